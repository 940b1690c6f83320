//! Shared constants for end-to-end tests

/// App name used for global ids in tests
pub const TEST_APP: &str = "friends";

/// Lower-case name seeded as the first friend
pub const JOHN_NAME: &str = "john";
pub const JOHN_EMAIL: &str = "john@example.com";

/// Upper-case name seeded as the second friend
pub const JOHN_SMITH_NAME: &str = "JOHN SMITH";
pub const JOHN_SMITH_EMAIL: &str = "John.Smith@Example.COM";
