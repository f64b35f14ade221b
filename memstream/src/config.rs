use crate::encoding::Encoding;

/// Settings shared by every channel and endpoint created from one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Encoding applied to text payloads written without an explicit one.
    pub default_encoding: Encoding,

    /// Upper bound on tasks run by a single `Scheduler::run_until_idle`.
    ///
    /// `None` drains until the queue is empty.
    pub task_budget: Option<usize>,
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self {
            default_encoding: Encoding::Utf8,
            task_budget: None,
        }
    }

    pub fn with_default_encoding(mut self, encoding: Encoding) -> Self {
        self.default_encoding = encoding;
        self
    }

    pub fn with_task_budget(mut self, budget: usize) -> Self {
        self.task_budget = Some(budget);
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = RegistryConfig::default();
        assert_eq!(config.default_encoding, Encoding::Utf8);
        assert_eq!(config.task_budget, None);

        let config = RegistryConfig::new()
            .with_default_encoding(Encoding::Latin1)
            .with_task_budget(10);
        assert_eq!(config.default_encoding, Encoding::Latin1);
        assert_eq!(config.task_budget, Some(10));
    }
}
