/// Client ids (members and users) are opaque strings issued by the platform.
pub type ClientId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
