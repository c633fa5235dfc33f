//! Gmail connector.

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD, URL_SAFE};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::google::{with_query, GoogleClient};
use super::Connector;
use crate::error::ConnectorError;
use crate::eval::matching::message_match;
use crate::task::{EvalKind, MessageInfo};

/// Gmail bodies come with or without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Mailbox collection a search runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailFolder {
    Messages,
    Drafts,
}

impl MailFolder {
    fn collection(&self) -> &'static str {
        match self {
            MailFolder::Messages => "messages",
            MailFolder::Drafts => "drafts",
        }
    }
}

/// A decoded mail message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    /// Message id, or draft id when listed from drafts.
    pub id: String,
    pub subject: String,
    pub recipient: String,
    pub body: String,
    pub attachment: Option<String>,
    pub cc: Option<String>,
}

/// Gmail search query for the fields of `info` that Gmail can filter on.
pub fn search_query(info: &MessageInfo) -> String {
    let mut query = String::new();
    if let Some(subject) = &info.subject {
        query.push_str(&format!("subject:{} ", subject));
    }
    if let Some(recipient) = &info.recipient {
        query.push_str(&format!("to:{} ", recipient));
    }
    if let Some(cc) = &info.cc {
        query.push_str(&format!("cc:{} ", cc));
    }
    query
}

/// Mail operations used by the gmail evaluator.
#[async_trait]
pub trait MailApi: Connector {
    /// Lists messages or drafts matching a Gmail search query.
    async fn list(
        &self,
        folder: MailFolder,
        query: &str,
    ) -> Result<Vec<MailMessage>, ConnectorError>;

    async fn create_draft(&self, info: &MessageInfo) -> Result<Value, ConnectorError>;

    async fn send_message(&self, info: &MessageInfo) -> Result<Value, ConnectorError>;

    async fn delete(&self, folder: MailFolder, id: &str) -> Result<(), ConnectorError>;

    /// Messages in `folder` matching every field set in `info`.
    async fn search(
        &self,
        info: &MessageInfo,
        folder: MailFolder,
    ) -> Result<Vec<MailMessage>, ConnectorError> {
        let candidates = self.list(folder, search_query(info).trim_end()).await?;
        Ok(candidates
            .into_iter()
            .filter(|msg| message_match(msg, info))
            .collect())
    }

    /// Deletes every entry of `folder` matching `info`, returning how many.
    async fn delete_matching(
        &self,
        info: &MessageInfo,
        folder: MailFolder,
    ) -> Result<usize, ConnectorError> {
        let matches = self.search(info, folder).await?;
        for msg in &matches {
            debug!("Deleting {} with subject {}", folder.collection(), msg.subject);
            self.delete(folder, &msg.id).await?;
        }
        Ok(matches.len())
    }
}

/// Gmail v1 REST connector for the authenticated user.
#[derive(Debug, Clone)]
pub struct GmailService {
    client: GoogleClient,
    api_base: String,
    default_recipient: String,
}

impl GmailService {
    pub fn new(
        client: GoogleClient,
        api_base: impl Into<String>,
        default_recipient: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            default_recipient: default_recipient.into(),
        }
    }

    fn user_url(&self, suffix: &str) -> String {
        format!("{}/users/me/{}", self.api_base, suffix)
    }

    /// Fetches and decodes a full message.
    pub async fn get_message(&self, message_id: &str) -> Result<MailMessage, ConnectorError> {
        let url = with_query(
            &self.user_url(&format!("messages/{}", urlencoding::encode(message_id))),
            &[("format", "full".to_string())],
        );
        let raw = self.client.get_json(&url).await?;
        parse_message(message_id, &raw)
    }

    fn raw_message(&self, info: &MessageInfo) -> String {
        let recipient = info
            .recipient
            .as_deref()
            .unwrap_or(self.default_recipient.as_str());
        URL_SAFE.encode(build_rfc822(recipient, info))
    }
}

impl Connector for GmailService {
    fn kind(&self) -> EvalKind {
        EvalKind::Gmail
    }

    fn env_settings(&self) -> Map<String, Value> {
        let mut settings = Map::new();
        settings.insert("default_recipient".to_string(), json!(self.default_recipient));
        settings
    }
}

#[async_trait]
impl MailApi for GmailService {
    async fn list(
        &self,
        folder: MailFolder,
        query: &str,
    ) -> Result<Vec<MailMessage>, ConnectorError> {
        let collection = folder.collection();
        let params = [("q", query.to_string())];
        let entries = self
            .client
            .list_all(&self.user_url(collection), &params, collection)
            .await?;

        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = entry.get("id").and_then(Value::as_str).unwrap_or_default();
            let message_id = match folder {
                MailFolder::Messages => id,
                MailFolder::Drafts => entry
                    .pointer("/message/id")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
            };
            let mut message = self.get_message(message_id).await?;
            message.id = id.to_string();
            messages.push(message);
        }
        Ok(messages)
    }

    async fn create_draft(&self, info: &MessageInfo) -> Result<Value, ConnectorError> {
        let body = json!({"message": {"raw": self.raw_message(info)}});
        let draft = self.client.post_json(&self.user_url("drafts"), &body).await?;
        debug!("Draft message: {}", draft);
        Ok(draft)
    }

    async fn send_message(&self, info: &MessageInfo) -> Result<Value, ConnectorError> {
        let body = json!({"raw": self.raw_message(info)});
        let sent = self
            .client
            .post_json(&self.user_url("messages/send"), &body)
            .await?;
        info!("Sent message {:?}", info.subject);
        Ok(sent)
    }

    async fn delete(&self, folder: MailFolder, id: &str) -> Result<(), ConnectorError> {
        let url = self.user_url(&format!(
            "{}/{}",
            folder.collection(),
            urlencoding::encode(id)
        ));
        self.client.delete(&url).await
    }
}

/// Renders a plain-text RFC 822 message. Non-ASCII header text is written
/// as RFC 2047 encoded words.
pub fn build_rfc822(recipient: &str, info: &MessageInfo) -> String {
    let mut out = format!("To: {}\r\n", encode_addresses(recipient));
    if let Some(cc) = &info.cc {
        out.push_str(&format!("Cc: {}\r\n", encode_addresses(cc)));
    }
    out.push_str(&format!(
        "Subject: {}\r\n",
        encode_header_text(info.subject.as_deref().unwrap_or_default())
    ));
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str("Content-Type: text/plain; charset=\"utf-8\"\r\n");
    out.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
    out.push_str(info.body.as_deref().unwrap_or_default());
    out.push_str("\r\n");
    out
}

/// Raw bytes per encoded word, keeping each word within 75 characters.
const ENCODED_WORD_BYTES: usize = 45;

/// `=?utf-8?b?...?=` encoding for non-ASCII text; ASCII passes through.
pub fn encode_header_text(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }
    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_BYTES {
            words.push(std::mem::take(&mut chunk));
        }
        chunk.push(c);
    }
    words.push(chunk);
    words
        .iter()
        .map(|w| format!("=?utf-8?b?{}?=", STANDARD.encode(w)))
        .collect::<Vec<_>>()
        .join("\r\n ")
}

/// Encodes the display names of a comma-separated address list.
fn encode_addresses(list: &str) -> String {
    list.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|address| match address.rfind('<') {
            Some(idx) => {
                let name = address[..idx].trim().trim_matches('"');
                if name.is_empty() {
                    address[idx..].to_string()
                } else {
                    format!("{} {}", encode_header_text(name), &address[idx..])
                }
            }
            None => address.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Decodes a `format=full` Gmail message resource.
pub fn parse_message(id: &str, raw: &Value) -> Result<MailMessage, ConnectorError> {
    let payload = raw
        .get("payload")
        .ok_or_else(|| ConnectorError::ParseError("message has no payload".to_string()))?;

    Ok(MailMessage {
        id: id.to_string(),
        subject: header(payload, "subject")
            .ok_or_else(|| ConnectorError::MissingHeader("Subject".into()))?,
        recipient: header(payload, "to")
            .ok_or_else(|| ConnectorError::MissingHeader("To".into()))?,
        body: decode_body(payload)?,
        attachment: attachment_name(payload),
        cc: header(payload, "cc"),
    })
}

fn header(payload: &Value, name: &str) -> Option<String> {
    payload
        .get("headers")?
        .as_array()?
        .iter()
        .find(|h| {
            h.get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .and_then(|h| h.get("value").and_then(Value::as_str))
        .map(str::to_string)
}

fn attachment_name(payload: &Value) -> Option<String> {
    payload
        .get("parts")?
        .as_array()?
        .iter()
        .filter_map(|p| p.get("filename").and_then(Value::as_str))
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

/// Finds the plain-text body, looking one level into nested multiparts.
fn decode_body(payload: &Value) -> Result<String, ConnectorError> {
    let size = payload
        .pointer("/body/size")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if size > 0 {
        return decode_part_data(payload);
    }

    let Some(parts) = payload.get("parts").and_then(Value::as_array) else {
        return Ok(String::new());
    };
    for part in parts {
        let candidates: Vec<&Value> = match part.get("parts").and_then(Value::as_array) {
            Some(nested) => nested.iter().collect(),
            None => vec![part],
        };
        if let Some(text) = candidates
            .into_iter()
            .find(|p| p.get("mimeType").and_then(Value::as_str) == Some("text/plain"))
        {
            return decode_part_data(text);
        }
    }
    Ok(String::new())
}

fn decode_part_data(part: &Value) -> Result<String, ConnectorError> {
    let data = part
        .pointer("/body/data")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let bytes = URL_SAFE_LENIENT
        .decode(data.as_bytes())
        .map_err(|e| ConnectorError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ConnectorError::Decode(e.to_string()))
}
