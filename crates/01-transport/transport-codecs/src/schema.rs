//! Executor-visible message schema frozen for rkyv serialization.
//!
//! `rkyv` expands `Archive` derives into generated archived mirrors; missing
//! docs are permitted module-wide so the generated types stay quiet.
#![allow(missing_docs)]
//!
//! Every message travels as `[empty][envelope][body]`. The envelope names the
//! body's type so the receiver can decode it without knowing which call the
//! message answers. Any backward-incompatible change must bump the schema
//! version.

use rkyv::{Archive, Deserialize, Serialize};

/// Schema version for executor-visible messages.
pub const SCHEMA_VERSION_V1: u8 = 1;

/// Which operation library the executor resolves kernels against.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OpLibrary {
    #[default]
    Host,
    Custom,
}

/// Header frame of every message.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct Envelope {
    pub ver: u8,
    /// Correlates a reply or push with the call that caused it.
    pub seq: u64,
    /// Registry name of the body that follows.
    pub type_name: String,
    pub session_id: Option<String>,
    /// Routing identity of the sender's receive socket.
    pub recv_identity: String,
    pub library: OpLibrary,
}

impl Envelope {
    pub fn new(seq: u64, type_name: impl Into<String>, recv_identity: impl Into<String>) -> Self {
        Self {
            ver: SCHEMA_VERSION_V1,
            seq,
            type_name: type_name.into(),
            session_id: None,
            recv_identity: recv_identity.into(),
            library: OpLibrary::Host,
        }
    }

    pub fn with_session(mut self, session_id: Option<&str>) -> Self {
        self.session_id = session_id.filter(|id| !id.is_empty()).map(str::to_owned);
        self
    }

    pub fn with_library(mut self, library: OpLibrary) -> Self {
        self.library = library;
        self
    }
}

/// Outcome reported by the executor. Zero means success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ResultCode {
    pub code: i32,
    pub message: String,
}

impl ResultCode {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Responses that carry a [`ResultCode`].
pub trait Outcome {
    fn result(&self) -> &ResultCode;
}

/// Host-side description of a tensor living on (or bound for) the executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct TensorBlob {
    /// Executor address handle; zero for host-only tensors.
    pub handle: u64,
    pub dtype: u32,
    pub shape: Vec<i64>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct AllocRequest {
    pub alignment: u64,
    pub num_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct AllocResponse {
    pub result: ResultCode,
    pub addr_handle: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct DeallocRequest {
    pub addr_handle: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct DeallocResponse {
    pub result: ResultCode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub config: Vec<u8>,
    pub function_library: Vec<u8>,
    pub graph: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub result: ResultCode,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct CloseSessionResponse {
    pub result: ResultCode,
}

/// Serialized kernel definition produced by the host-side kernel serializer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct KernelDef {
    pub id: String,
    pub library: OpLibrary,
    pub extra: Vec<u8>,
}

/// Serialized execution context (inputs, outputs, status) for one kernel run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ContextDef {
    pub extra: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct RunRequest {
    pub kernel: KernelDef,
    pub context: ContextDef,
}

/// One keyed tensor exchanged through the rendezvous.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct RendezItem {
    pub key: String,
    pub tensor: TensorBlob,
    pub is_dead: bool,
    pub result: ResultCode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct RunResponse {
    pub result: ResultCode,
    pub context: ContextDef,
    /// Tensors the kernel produced for host-side consumers.
    pub rendez_sends: Vec<RendezItem>,
}

/// Executor push asking the host for tensors the running kernel needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct RendezRecvRequest {
    pub keys: Vec<String>,
}

/// Host answer to a [`RendezRecvRequest`], sent under the same sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct RendezRecvUpdate {
    pub forseq: u64,
    pub items: Vec<RendezItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct FetchRequest {
    pub library: OpLibrary,
    pub tensors: Vec<TensorBlob>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct FetchResponse {
    pub result: ResultCode,
    pub tensors: Vec<TensorBlob>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct PushRequest {
    pub library: OpLibrary,
    /// Destination tensors on the executor.
    pub targets: Vec<TensorBlob>,
    /// Host contents, matched to `targets` by position.
    pub data: Vec<TensorBlob>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct PushResponse {
    pub result: ResultCode,
}

/// Request tunnelled under a caller-chosen type name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct CustomRequest {
    pub type_name: String,
    pub extra: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct CustomResponse {
    pub result: ResultCode,
    pub type_name: String,
    pub extra: Vec<u8>,
}

macro_rules! impl_outcome {
    ($($ty:ident),* $(,)?) => {
        $(impl Outcome for $ty {
            fn result(&self) -> &ResultCode {
                &self.result
            }
        })*
    };
}

impl_outcome!(
    AllocResponse,
    DeallocResponse,
    CreateSessionResponse,
    CloseSessionResponse,
    RunResponse,
    FetchResponse,
    PushResponse,
    CustomResponse,
);
