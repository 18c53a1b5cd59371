use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use parley_db::{ChatStore, Database};
use parley_types::models::User;

/// In-memory store seeded with `n` users.
pub fn seeded_store(n: usize) -> (Arc<Database>, Vec<Uuid>) {
    let db = Database::open_in_memory().unwrap();
    let ids = (0..n)
        .map(|i| {
            let user = User {
                id: Uuid::new_v4(),
                full_name: format!("User {}", i),
                email: format!("user{}@example.com", i),
                profile_pic: None,
                created_at: Utc::now(),
            };
            db.insert_user(&user).unwrap();
            user.id
        })
        .collect();
    (Arc::new(db), ids)
}

pub fn as_store(db: &Arc<Database>) -> Arc<dyn ChatStore> {
    db.clone()
}
