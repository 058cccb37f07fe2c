//! Task abstraction
//!
//! A task is a unit of work with an identity, a kind tag used for routing, a
//! priority, a validation step run before admission, and a metadata snapshot
//! copied into its result for auditing.
//!
//! Two concrete kinds ship with the crate ([`ImageTask`], [`DataTask`]) together
//! with [`AnyTask`], a closed enum over both that serializes with a `type` tag.
//! Callers with their own task types implement [`Task`] directly; `Box<dyn Task>`
//! also implements it, so heterogeneous queues work without an enum.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audit snapshot of a task, keyed by field name
pub type Metadata = BTreeMap<String, Value>;

/// Kind tag of [`ImageTask`]
pub const IMAGE_PROCESSING: &str = "image_processing";

/// Kind tag of [`DataTask`]
pub const DATA_ANALYSIS: &str = "data_analysis";

/// A unit of work accepted by the worker pool
pub trait Task: Send {
    /// Task identity. Not required to be unique.
    fn id(&self) -> &str;

    /// Kind tag used to select a handler
    fn kind(&self) -> &str;

    /// Scheduling hint carried through to metadata. The queue itself is FIFO.
    fn priority(&self) -> i32;

    /// Check kind-specific required fields. Must not perform I/O.
    fn validate(&self) -> Result<(), ValidationError>;

    /// Side-effect-free snapshot sufficient to rebuild an audit record
    fn metadata(&self) -> Metadata;
}

impl<T: Task + ?Sized> Task for Box<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn kind(&self) -> &str {
        (**self).kind()
    }

    fn priority(&self) -> i32 {
        (**self).priority()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        (**self).validate()
    }

    fn metadata(&self) -> Metadata {
        (**self).metadata()
    }
}

/// Validation failure naming every missing field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("invalid {kind} task {task_id:?}: missing required field(s): {}", .missing.join(", "))]
pub struct ValidationError {
    pub task_id: String,
    pub kind: String,
    pub missing: Vec<String>,
}

impl ValidationError {
    /// Collect missing fields; `Ok` when none are missing.
    pub fn check<'a>(
        task_id: &str,
        kind: &str,
        fields: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Result<(), Self> {
        let missing: Vec<String> = fields
            .into_iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| name.to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Self {
                task_id: task_id.to_string(),
                kind: kind.to_string(),
                missing,
            })
        }
    }
}

/// Build metadata from a task's serde representation plus its kind tag.
fn serde_metadata<T: Serialize>(task: &T, kind: &str) -> Metadata {
    let mut metadata = match serde_json::to_value(task) {
        Ok(Value::Object(fields)) => fields.into_iter().collect(),
        _ => Metadata::new(),
    };
    metadata.insert("type".to_string(), Value::String(kind.to_string()));
    metadata
}

/// Image processing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTask {
    pub id: String,
    pub image_url: String,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub priority: i32,
}

impl ImageTask {
    pub fn new(id: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image_url: image_url.into(),
            filters: Vec::new(),
            priority: 0,
        }
    }

    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Task for ImageTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        IMAGE_PROCESSING
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check(
            &self.id,
            IMAGE_PROCESSING,
            [
                ("id", !self.id.trim().is_empty()),
                ("image_url", !self.image_url.trim().is_empty()),
            ],
        )
    }

    fn metadata(&self) -> Metadata {
        serde_metadata(self, IMAGE_PROCESSING)
    }
}

impl fmt::Display for ImageTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageTask({})", self.id)
    }
}

/// Dataset query request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTask {
    pub id: String,
    pub dataset: String,
    #[serde(default)]
    pub query: serde_json::Map<String, Value>,
    #[serde(default)]
    pub priority: i32,
}

impl DataTask {
    pub fn new(id: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dataset: dataset.into(),
            query: serde_json::Map::new(),
            priority: 0,
        }
    }

    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Task for DataTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        DATA_ANALYSIS
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::check(
            &self.id,
            DATA_ANALYSIS,
            [
                ("id", !self.id.trim().is_empty()),
                ("dataset", !self.dataset.trim().is_empty()),
            ],
        )
    }

    fn metadata(&self) -> Metadata {
        serde_metadata(self, DATA_ANALYSIS)
    }
}

impl fmt::Display for DataTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataTask({})", self.id)
    }
}

/// Any of the built-in task kinds
///
/// Serialized with an internal `type` tag matching the kind string:
///
/// ```
/// use workgate::task::{AnyTask, Task};
///
/// let task: AnyTask = serde_json::from_str(
///     r#"{"type":"image_processing","id":"img_1","image_url":"https://example.com/a.jpg"}"#,
/// ).unwrap();
/// assert_eq!(task.kind(), "image_processing");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnyTask {
    #[serde(rename = "image_processing")]
    Image(ImageTask),
    #[serde(rename = "data_analysis")]
    Data(DataTask),
}

impl AnyTask {
    fn inner(&self) -> &dyn Task {
        match self {
            Self::Image(task) => task,
            Self::Data(task) => task,
        }
    }
}

impl Task for AnyTask {
    fn id(&self) -> &str {
        self.inner().id()
    }

    fn kind(&self) -> &str {
        self.inner().kind()
    }

    fn priority(&self) -> i32 {
        self.inner().priority()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.inner().validate()
    }

    fn metadata(&self) -> Metadata {
        self.inner().metadata()
    }
}

impl From<ImageTask> for AnyTask {
    fn from(task: ImageTask) -> Self {
        Self::Image(task)
    }
}

impl From<DataTask> for AnyTask {
    fn from(task: DataTask) -> Self {
        Self::Data(task)
    }
}

impl fmt::Display for AnyTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image(task) => task.fmt(f),
            Self::Data(task) => task.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_task_validates() {
        let task = ImageTask::new("img_1", "https://example.com/a.jpg");
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_image_task_names_all_missing_fields() {
        let err = ImageTask::new("", " ").validate().unwrap_err();
        assert_eq!(err.kind, IMAGE_PROCESSING);
        assert_eq!(err.missing, vec!["id", "image_url"]);
        assert!(err.to_string().contains("id, image_url"));
    }

    #[test]
    fn test_data_task_missing_dataset() {
        let err = DataTask::new("data_1", "").validate().unwrap_err();
        assert_eq!(err.task_id, "data_1");
        assert_eq!(err.missing, vec!["dataset"]);
    }

    #[test]
    fn test_image_metadata() {
        let task = ImageTask::new("img_2", "https://example.com/b.jpg")
            .with_filters(["blur", "sharpen"])
            .with_priority(7);

        let metadata = task.metadata();
        assert_eq!(metadata["id"], json!("img_2"));
        assert_eq!(metadata["image_url"], json!("https://example.com/b.jpg"));
        assert_eq!(metadata["filters"], json!(["blur", "sharpen"]));
        assert_eq!(metadata["priority"], json!(7));
        assert_eq!(metadata["type"], json!(IMAGE_PROCESSING));
    }

    #[test]
    fn test_data_metadata_includes_query() {
        let task = DataTask::new("data_2", "dataset_3")
            .with_query_param("type", "aggregation")
            .with_query_param("field", "value");

        let metadata = task.metadata();
        assert_eq!(metadata["dataset"], json!("dataset_3"));
        assert_eq!(
            metadata["query"],
            json!({"type": "aggregation", "field": "value"})
        );
        assert_eq!(metadata["type"], json!(DATA_ANALYSIS));
    }

    #[test]
    fn test_metadata_is_repeatable() {
        let task = DataTask::new("data_3", "ds").with_priority(2);
        assert_eq!(task.metadata(), task.metadata());
    }

    #[test]
    fn test_any_task_delegates() {
        let task: AnyTask = DataTask::new("data_4", "ds").with_priority(4).into();
        assert_eq!(task.id(), "data_4");
        assert_eq!(task.kind(), DATA_ANALYSIS);
        assert_eq!(task.priority(), 4);
        assert_eq!(task.to_string(), "DataTask(data_4)");
    }

    #[test]
    fn test_any_task_serde_tag() {
        let task: AnyTask = ImageTask::new("img_5", "https://example.com/c.jpg").into();
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], json!(IMAGE_PROCESSING));

        let parsed: AnyTask = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_boxed_dyn_task() {
        let task: Box<dyn Task> = Box::new(ImageTask::new("img_6", "u"));
        assert_eq!(task.id(), "img_6");
        assert_eq!(task.kind(), IMAGE_PROCESSING);
        assert!(task.validate().is_ok());
    }
}
