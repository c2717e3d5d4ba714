use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
    pub is_self: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub id: String,
    pub name: Option<String>,
    pub is_group: bool,
    pub unread_count: Option<u32>,
}

impl ChatInfo {
    /// 没有名称时退回到 id 的用户部分。
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => self.id.split('@').next().unwrap_or(&self.id),
        }
    }
}
