//! JobKind trait - binds a payload type to its job_type string.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A payload struct that knows which job type it belongs to.
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// impl JobKind for SendEmail {
///     const TYPE: &'static str = "sendEmail";
/// }
/// ```
///
/// # Trait Bounds
/// - `DeserializeOwned`: decoded from the job's JSON payload
/// - `Send + Sync + 'static`: moved into spawned handler tasks
pub trait JobKind: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}
