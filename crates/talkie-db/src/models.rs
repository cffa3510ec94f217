//! Database row types. These map directly to SQLite rows and stay distinct
//! from the talkie-types models so the wire format can move independently.

pub struct UserRow {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub email: String,
}

pub struct MessageRow {
    pub id: i64,
    pub from: String,
    pub to: String,
    pub duration: i64,
    /// Base64 text of the opaque payload.
    pub content: String,
    pub created_at: String,
    pub played: bool,
}
