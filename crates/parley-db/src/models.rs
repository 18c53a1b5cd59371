/// Database row types. These map directly to SQLite rows and are
/// converted to `parley_types` models at the store boundary.

pub struct UserRow {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub profile_pic: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub read: bool,
    pub created_at: String,
}
