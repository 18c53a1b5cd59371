use rusqlite::types::Value;
use uuid::Uuid;

/// One conjunctive clause: every field that is set must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMatch {
    pub sender_id: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub read: Option<bool>,
}

/// A disjunction of [`MessageMatch`] clauses. No clauses matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub any: Vec<MessageMatch>,
}

impl MessageFilter {
    pub fn single(clause: MessageMatch) -> Self {
        Self { any: vec![clause] }
    }

    pub fn or(mut self, clause: MessageMatch) -> Self {
        self.any.push(clause);
        self
    }

    /// Both directions between `a` and `b`.
    pub fn conversation(a: Uuid, b: Uuid) -> Self {
        Self::single(MessageMatch {
            sender_id: Some(a),
            receiver_id: Some(b),
            read: None,
        })
        .or(MessageMatch {
            sender_id: Some(b),
            receiver_id: Some(a),
            read: None,
        })
    }

    /// Unread messages from `sender` to `receiver`.
    pub fn unread_between(sender: Uuid, receiver: Uuid) -> Self {
        Self::single(MessageMatch {
            sender_id: Some(sender),
            receiver_id: Some(receiver),
            read: Some(false),
        })
    }

    /// Unread messages addressed to `receiver` from anyone.
    pub fn unread_for(receiver: Uuid) -> Self {
        Self::single(MessageMatch {
            sender_id: None,
            receiver_id: Some(receiver),
            read: Some(false),
        })
    }

    /// Render as a SQL boolean expression with positional `?` parameters.
    pub(crate) fn to_sql(&self) -> (String, Vec<Value>) {
        if self.any.is_empty() {
            return ("0 = 1".to_string(), Vec::new());
        }

        let mut params = Vec::new();
        let clauses: Vec<String> = self
            .any
            .iter()
            .map(|clause| {
                let mut terms = Vec::new();
                if let Some(sender) = clause.sender_id {
                    terms.push("sender_id = ?");
                    params.push(Value::Text(sender.to_string()));
                }
                if let Some(receiver) = clause.receiver_id {
                    terms.push("receiver_id = ?");
                    params.push(Value::Text(receiver.to_string()));
                }
                if let Some(read) = clause.read {
                    terms.push("read = ?");
                    params.push(Value::Integer(read as i64));
                }
                if terms.is_empty() {
                    "(1 = 1)".to_string()
                } else {
                    format!("({})", terms.join(" AND "))
                }
            })
            .collect();

        (clauses.join(" OR "), params)
    }
}

/// Column used to bucket [`crate::ChatStore::count_by_group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Sender,
    Receiver,
}

impl GroupKey {
    pub(crate) fn column(self) -> &'static str {
        match self {
            GroupKey::Sender => "sender_id",
            GroupKey::Receiver => "receiver_id",
        }
    }
}

/// Fields to overwrite in [`crate::ChatStore::update_many`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub read: Option<bool>,
}

impl MessagePatch {
    pub fn mark_read() -> Self {
        Self { read: Some(true) }
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_none()
    }
}
