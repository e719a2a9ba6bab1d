//! Name and image based container selection

use crate::models::ContainerIdentity;
use regex::Regex;

/// Regex filters deciding which containers are forwarded.
///
/// A container is admitted when every configured match pattern matches and
/// no configured skip pattern matches. An empty filter admits everything.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilter {
    match_by_name: Option<Regex>,
    match_by_image: Option<Regex>,
    skip_by_name: Option<Regex>,
    skip_by_image: Option<Regex>,
}

impl ContainerFilter {
    pub fn from_patterns(
        match_by_name: Option<&str>,
        match_by_image: Option<&str>,
        skip_by_name: Option<&str>,
        skip_by_image: Option<&str>,
    ) -> Result<Self, regex::Error> {
        let compile = |pattern: Option<&str>| pattern.map(Regex::new).transpose();

        Ok(Self {
            match_by_name: compile(match_by_name)?,
            match_by_image: compile(match_by_image)?,
            skip_by_name: compile(skip_by_name)?,
            skip_by_image: compile(skip_by_image)?,
        })
    }

    pub fn admits(&self, identity: &ContainerIdentity) -> bool {
        let image = identity.image_name.as_deref().unwrap_or("");

        let matches = |re: &Option<Regex>, value: &str| re.as_ref().map(|r| r.is_match(value));

        if matches(&self.match_by_name, &identity.name) == Some(false)
            || matches(&self.match_by_image, image) == Some(false)
        {
            return false;
        }

        !(matches(&self.skip_by_name, &identity.name) == Some(true)
            || matches(&self.skip_by_image, image) == Some(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, image: &str) -> ContainerIdentity {
        ContainerIdentity::from_runtime("id", name, Some(image.to_string()), None)
    }

    #[test]
    fn test_empty_filter_admits_all() {
        let filter = ContainerFilter::default();
        assert!(filter.admits(&identity("anything", "any:image")));
    }

    #[test]
    fn test_match_and_skip() {
        let filter =
            ContainerFilter::from_patterns(Some("^web"), None, Some("canary"), Some("pause"))
                .unwrap();

        assert!(filter.admits(&identity("web-1", "nginx:latest")));
        assert!(!filter.admits(&identity("db-1", "postgres:16")));
        assert!(!filter.admits(&identity("web-canary", "nginx:latest")));
        assert!(!filter.admits(&identity("web-2", "k8s.gcr.io/pause:3.9")));
    }

    #[test]
    fn test_match_by_image() {
        let filter = ContainerFilter::from_patterns(None, Some("^nginx"), None, None).unwrap();

        assert!(filter.admits(&identity("web-1", "nginx:latest")));
        assert!(!filter.admits(&identity("web-1", "httpd:2")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(ContainerFilter::from_patterns(Some("("), None, None, None).is_err());
    }
}
