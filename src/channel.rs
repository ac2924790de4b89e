use std::fmt;

/// Prefix used when no explicit prefix is configured.
pub const DEFAULT_PREFIX: &str = "ipc";

/// Separator between prefix and operation name.
pub const SEPARATOR: &str = ":";

/// Derive the channel an operation travels on.
///
/// An empty prefix falls back to [`DEFAULT_PREFIX`], so both ends agree even
/// when one of them leaves the prefix unset.
pub fn channel_name(prefix: &str, operation: &str) -> String {
    let prefix = if prefix.is_empty() {
        DEFAULT_PREFIX
    } else {
        prefix
    };
    format!("{prefix}{SEPARATOR}{operation}")
}

/// Namespace for one contract registration on a transport.
///
/// Two contracts sharing a transport must use distinct prefixes when their
/// operation names overlap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelPrefix(String);

impl ChannelPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        if prefix.is_empty() {
            Self::default()
        } else {
            Self(prefix)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn channel(&self, operation: &str) -> String {
        channel_name(&self.0, operation)
    }

    pub fn descriptor(&self, operation: impl Into<String>) -> OperationDescriptor {
        OperationDescriptor {
            prefix: self.clone(),
            operation: operation.into(),
        }
    }
}

impl Default for ChannelPrefix {
    fn default() -> Self {
        Self(DEFAULT_PREFIX.to_string())
    }
}

impl fmt::Display for ChannelPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelPrefix {
    fn from(prefix: &str) -> Self {
        Self::new(prefix)
    }
}

impl From<String> for ChannelPrefix {
    fn from(prefix: String) -> Self {
        Self::new(prefix)
    }
}

/// A single operation of a contract registered under a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationDescriptor {
    pub prefix: ChannelPrefix,
    pub operation: String,
}

impl OperationDescriptor {
    pub fn channel(&self) -> String {
        self.prefix.channel(&self.operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prefix_is_used_for_empty_prefix() {
        assert_eq!(channel_name("", "ping"), "ipc:ping");
        assert_eq!(ChannelPrefix::new("").channel("ping"), "ipc:ping");
        assert_eq!(ChannelPrefix::default().as_str(), DEFAULT_PREFIX);
    }

    #[test]
    fn custom_prefix_namespaces_operations() {
        let a = ChannelPrefix::from("ipcA");
        let b = ChannelPrefix::from("ipcB");
        assert_eq!(a.channel("foo"), "ipcA:foo");
        assert_ne!(a.channel("foo"), b.channel("foo"));
    }

    #[test]
    fn descriptor_matches_free_function() {
        let prefix = ChannelPrefix::new("app");
        let descriptor = prefix.descriptor("onSomething");
        assert_eq!(descriptor.channel(), channel_name("app", "onSomething"));
        assert_eq!(descriptor.channel(), descriptor.clone().channel());
    }
}
