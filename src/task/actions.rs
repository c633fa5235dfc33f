//! Action and check vocabularies used in task configurations.
//!
//! Every step is written as a single-key JSON object whose key names the
//! action, e.g. `{"mkdir": {"path": "tmp"}}`. Names are closed: anything not
//! listed here is rejected when the task is loaded.

use std::fmt;
use std::marker::PhantomData;

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The external environment an evaluator or reset action is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalKind {
    Filesystem,
    GoogleCalendar,
    Gmail,
}

impl EvalKind {
    /// The `eval_type` tag used in task configurations.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvalKind::Filesystem => "filesystem",
            EvalKind::GoogleCalendar => "google_calendar",
            EvalKind::Gmail => "gmail",
        }
    }
}

impl fmt::Display for EvalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// A filesystem mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsAction {
    CreateFile {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Mkdir {
        path: String,
    },
    Rm {
        path: String,
    },
    Rmdir {
        path: String,
    },
    Rename {
        old_name: String,
        new_name: String,
    },
    Copy {
        src: String,
        dest: String,
    },
    Move {
        src: String,
        dest: String,
    },
    Chmod {
        path: String,
        mode: String,
    },
}

impl FsAction {
    pub const NAMES: &'static [&'static str] = &[
        "create_file",
        "mkdir",
        "rm",
        "rmdir",
        "rename",
        "copy",
        "move",
        "chmod",
    ];
}

/// Expected type of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Folder,
}

/// Expected metadata of a file; absent fields are not checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

type EntryRef<'a, V> = fn(&'a (String, V)) -> (&'a String, &'a V);

/// Path-keyed check entries, kept in the order the task declares them.
#[derive(Debug, Clone, PartialEq)]
pub struct Entries<V>(Vec<(String, V)>);

impl<V> Entries<V> {
    pub fn get(&self, path: &str) -> Option<&V> {
        self.0.iter().find(|(p, _)| p == path).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.0.iter().map(|(p, v)| (p, v))
    }
}

impl<V> FromIterator<(String, V)> for Entries<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a, V> IntoIterator for &'a Entries<V> {
    type Item = (&'a String, &'a V);
    type IntoIter = std::iter::Map<std::slice::Iter<'a, (String, V)>, EntryRef<'a, V>>;

    fn into_iter(self) -> Self::IntoIter {
        let split: EntryRef<'a, V> = |(p, v)| (p, v);
        self.0.iter().map(split)
    }
}

impl<V: Serialize> Serialize for Entries<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (path, value) in &self.0 {
            map.serialize_entry(path, value)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Entries<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
            type Value = Entries<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of paths to expected values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((path, value)) = access.next_entry::<String, V>()? {
                    entries.push((path, value));
                }
                Ok(Entries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor(PhantomData))
    }
}

/// A filesystem assertion. Each entry of the map is one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsCheck {
    Exists(Entries<bool>),
    TypeCheck(Entries<FileKind>),
    PermissionsCheck(Entries<String>),
    ContentCheck(Entries<String>),
    MetadataCheck(Entries<FileMetadata>),
}

impl FsCheck {
    pub const NAMES: &'static [&'static str] = &[
        "exists",
        "type_check",
        "permissions_check",
        "content_check",
        "metadata_check",
    ];
}

/// One step of a filesystem evaluation: either a mutation or an assertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FsStep {
    Action(FsAction),
    Check(FsCheck),
}

impl<'de> Deserialize<'de> for FsStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let name = single_key(&value).map_err(de::Error::custom)?;
        if FsAction::NAMES.contains(&name.as_str()) {
            serde_json::from_value(value)
                .map(FsStep::Action)
                .map_err(de::Error::custom)
        } else if FsCheck::NAMES.contains(&name.as_str()) {
            serde_json::from_value(value)
                .map(FsStep::Check)
                .map_err(de::Error::custom)
        } else {
            Err(de::Error::custom(format!(
                "unknown filesystem step '{}'",
                name
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Google Calendar
// ---------------------------------------------------------------------------

/// A calendar event to insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub start_time: String,
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

/// A calendar reset action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarAction {
    CreateEvent(EventSpec),
    /// Deletes every event matching the reference fields.
    DeleteEvent { event: Map<String, Value> },
    ClearCalendar {},
}

impl CalendarAction {
    pub const NAMES: &'static [&'static str] = &["create_event", "delete_event", "clear_calendar"];
}

/// A calendar assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarCheck {
    CheckEventExists {
        event: Map<String, Value>,
        exists: bool,
    },
    CheckEventCount {
        start_time: String,
        end_time: String,
        count: usize,
    },
}

// ---------------------------------------------------------------------------
// Gmail
// ---------------------------------------------------------------------------

/// Fields of a mail message, used both to create messages and as a match
/// reference. Absent fields are neither set nor compared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

/// A gmail reset action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GmailAction {
    CreateDraft { draft_info: MessageInfo },
    DeleteDraft { draft_info: MessageInfo },
    SendMessage { message_info: MessageInfo },
    DeleteSentMessage { message_info: MessageInfo },
}

impl GmailAction {
    pub const NAMES: &'static [&'static str] = &[
        "create_draft",
        "delete_draft",
        "send_message",
        "delete_sent_message",
    ];
}

/// A gmail assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GmailCheck {
    CheckDraftExists {
        draft_info: MessageInfo,
        exists: bool,
    },
    CheckSentMessageExists {
        message_info: MessageInfo,
        exists: bool,
    },
}

// ---------------------------------------------------------------------------
// Reset actions
// ---------------------------------------------------------------------------

/// A reset action, routed to the environment whose vocabulary names it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResetAction {
    Filesystem(FsAction),
    Calendar(CalendarAction),
    Gmail(GmailAction),
}

impl ResetAction {
    /// The environment this action mutates.
    pub fn environment(&self) -> EvalKind {
        match self {
            ResetAction::Filesystem(_) => EvalKind::Filesystem,
            ResetAction::Calendar(_) => EvalKind::GoogleCalendar,
            ResetAction::Gmail(_) => EvalKind::Gmail,
        }
    }
}

impl<'de> Deserialize<'de> for ResetAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let name = single_key(&value).map_err(de::Error::custom)?;
        let name = name.as_str();
        if FsAction::NAMES.contains(&name) {
            serde_json::from_value(value)
                .map(ResetAction::Filesystem)
                .map_err(de::Error::custom)
        } else if CalendarAction::NAMES.contains(&name) {
            serde_json::from_value(value)
                .map(ResetAction::Calendar)
                .map_err(de::Error::custom)
        } else if GmailAction::NAMES.contains(&name) {
            serde_json::from_value(value)
                .map(ResetAction::Gmail)
                .map_err(de::Error::custom)
        } else {
            Err(de::Error::custom(format!("unknown reset action '{}'", name)))
        }
    }
}

/// Returns the only key of a single-key object.
fn single_key(value: &Value) -> Result<String, String> {
    match value {
        Value::Object(map) if map.len() == 1 => map
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| "empty step object".to_string()),
        other => Err(format!(
            "step must be an object with exactly one key, got: {}",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fs_step_parses_action_and_check() {
        let action: FsStep = serde_json::from_value(json!({"mkdir": {"path": "tmp"}})).unwrap();
        assert_eq!(
            action,
            FsStep::Action(FsAction::Mkdir {
                path: "tmp".to_string()
            })
        );

        let check: FsStep =
            serde_json::from_value(json!({"exists": {"tmp/test.txt": true}})).unwrap();
        match check {
            FsStep::Check(FsCheck::Exists(map)) => assert_eq!(map.get("tmp/test.txt"), Some(&true)),
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_check_entries_keep_declaration_order() {
        let check: FsStep = serde_json::from_str(
            r#"{"content_check": {"z.txt": "last", "a.txt": "first", "m/n.txt": "mid"}}"#,
        )
        .unwrap();
        let FsStep::Check(FsCheck::ContentCheck(entries)) = &check else {
            panic!("unexpected step: {:?}", check);
        };
        let paths: Vec<&str> = entries.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["z.txt", "a.txt", "m/n.txt"]);

        let rendered = serde_json::to_string(&check).unwrap();
        assert!(rendered.find("z.txt").unwrap() < rendered.find("a.txt").unwrap());
    }

    #[test]
    fn test_unknown_fs_step_is_rejected() {
        let err = serde_json::from_value::<FsStep>(json!({"shred": {"path": "x"}})).unwrap_err();
        assert!(err.to_string().contains("unknown filesystem step 'shred'"));
    }

    #[test]
    fn test_multi_key_step_is_rejected() {
        let result = serde_json::from_value::<FsStep>(json!({
            "mkdir": {"path": "a"},
            "rm": {"path": "b"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_reset_action_routing() {
        let fs: ResetAction =
            serde_json::from_value(json!({"create_file": {"path": "a.txt", "content": "hi"}}))
                .unwrap();
        assert_eq!(fs.environment(), EvalKind::Filesystem);

        let cal: ResetAction = serde_json::from_value(json!({"clear_calendar": {}})).unwrap();
        assert_eq!(cal.environment(), EvalKind::GoogleCalendar);

        let mail: ResetAction = serde_json::from_value(json!({
            "delete_draft": {"draft_info": {"subject": "Hello"}}
        }))
        .unwrap();
        assert_eq!(mail.environment(), EvalKind::Gmail);

        let err = serde_json::from_value::<ResetAction>(json!({"reboot": {}})).unwrap_err();
        assert!(err.to_string().contains("unknown reset action 'reboot'"));
    }

    #[test]
    fn test_event_spec_defaults_time_zone() {
        let action: CalendarAction = serde_json::from_value(json!({
            "create_event": {
                "start_time": "2024-01-01T10:00:00Z",
                "end_time": "2024-01-01T11:00:00Z",
                "summary": "Standup"
            }
        }))
        .unwrap();
        match action {
            CalendarAction::CreateEvent(spec) => {
                assert_eq!(spec.time_zone, "UTC");
                assert!(spec.attendees.is_empty());
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_fs_step_serializes_as_single_key_object() {
        let step = FsStep::Action(FsAction::Chmod {
            path: "a".to_string(),
            mode: "644".to_string(),
        });
        assert_eq!(
            serde_json::to_value(&step).unwrap(),
            json!({"chmod": {"path": "a", "mode": "644"}})
        );
    }
}
