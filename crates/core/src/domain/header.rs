use std::sync::LazyLock;

use regex::Regex;

use super::ConversationIdentity;

static INFO_PANEL_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+\d{6,15}$").expect("valid phone regex"));

static PHONE_LIKE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\+\d{1,3})?\s*\d[\d\s]{8,20}$").expect("valid phone name regex")
});

const CONTACT_SUFFIX: &str = "@c.us";
const GROUP_SUFFIX: &str = "@g.us";

/// 页面当前渲染的会话标题内容。
///
/// 各列表按优先级从高到低排列。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSnapshot {
    pub title: Option<String>,
    pub identifier_attributes: Vec<String>,
    pub detail_texts: Vec<String>,
    pub group_tokens: Vec<String>,
}

impl HeaderSnapshot {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// 返回 `None` 表示页面上没有可用内容，不算错误。
    pub fn identity(&self) -> Option<ConversationIdentity> {
        let title = self.title.as_deref()?.trim();
        if title.is_empty() {
            return None;
        }

        ConversationIdentity::new(title, self.stable_id(title)).ok()
    }

    fn stable_id(&self, display_name: &str) -> Option<String> {
        self.from_identifier_attributes()
            .or_else(|| self.from_detail_texts())
            .or_else(|| from_phone_like_name(display_name))
            .or_else(|| self.from_group_tokens())
    }

    fn from_identifier_attributes(&self) -> Option<String> {
        self.identifier_attributes
            .iter()
            .map(|value| value.trim())
            .find(|value| is_conversation_id(value))
            .map(str::to_string)
    }

    fn from_detail_texts(&self) -> Option<String> {
        self.detail_texts.iter().find_map(|text| {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            INFO_PANEL_PHONE
                .is_match(&compact)
                .then(|| format!("{}{CONTACT_SUFFIX}", digits_only(&compact)))
        })
    }

    fn from_group_tokens(&self) -> Option<String> {
        self.group_tokens
            .iter()
            .filter(|token| token.contains("group-"))
            .filter_map(|token| token.rsplit('-').next())
            .find(|suffix| suffix.len() > 5)
            .map(|suffix| format!("{suffix}{GROUP_SUFFIX}"))
    }
}

pub fn is_conversation_id(value: &str) -> bool {
    value.ends_with(CONTACT_SUFFIX) || value.ends_with(GROUP_SUFFIX)
}

fn from_phone_like_name(display_name: &str) -> Option<String> {
    if !PHONE_LIKE_NAME.is_match(display_name) {
        return None;
    }

    let digits = digits_only(display_name);
    (digits.len() >= 8).then(|| format!("{digits}{CONTACT_SUFFIX}"))
}

fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}
