use std::fmt;

/// Tags prefixed to every log line of a transcription attempt, so all lines
/// for one video (and, on the runner path, one runner job) can be grepped
/// together. Passed explicitly to each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTags {
    tags: Vec<String>,
}

impl LogTags {
    pub fn new(component: &str) -> Self {
        Self {
            tags: vec![component.to_string()],
        }
    }

    pub fn with(mut self, tag: impl fmt::Display) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn extend<I, T>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: fmt::Display,
    {
        self.tags.extend(extra.into_iter().map(|t| t.to_string()));
        self
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }
}

impl fmt::Display for LogTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.tags.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_tags() {
        let tags = LogTags::new("video-caption")
            .with("0b6a1f5e")
            .extend(["runner-job", "42"]);
        assert_eq!(tags.to_string(), "[video-caption 0b6a1f5e runner-job 42]");
        assert_eq!(tags.tags().len(), 4);
    }
}
