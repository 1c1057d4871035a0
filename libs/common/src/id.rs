use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = notify_common::id::prefixed_ulid("sub");
/// assert!(id.starts_with("sub_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Well-known ID prefixes used to correlate client log lines.
pub mod prefix {
    pub const SUBSCRIPTION: &str = "sub";
    pub const CONNECTION: &str = "conn";
    pub const BINDING: &str = "bnd";
}
