use std::fmt;

use crate::codec::{deserialize, serialize};
use crate::schema::*;
use crate::CodecResult;

/// A message body with a statically known schema type.
pub trait Message: Into<Payload> + TryFrom<Payload, Error = Payload> + Send + 'static {
    const KIND: PayloadKind;

    fn type_name() -> &'static str {
        Self::KIND.type_name()
    }
}

macro_rules! payloads {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Every body the executor protocol carries.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum Payload {
            $($variant($variant),)*
        }

        /// Discriminant of [`Payload`], used as the reply template of a call.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PayloadKind {
            $($variant,)*
        }

        impl PayloadKind {
            pub const ALL: &'static [PayloadKind] = &[$(PayloadKind::$variant,)*];

            /// Name carried in the envelope's `type_name` field.
            pub fn type_name(self) -> &'static str {
                match self {
                    $(PayloadKind::$variant => $name,)*
                }
            }
        }

        impl Payload {
            pub fn kind(&self) -> PayloadKind {
                match self {
                    $(Payload::$variant(_) => PayloadKind::$variant,)*
                }
            }

            pub fn encode(&self) -> CodecResult<Vec<u8>> {
                match self {
                    $(Payload::$variant(body) => serialize(body),)*
                }
            }

            pub fn decode(kind: PayloadKind, bytes: &[u8]) -> CodecResult<Payload> {
                match kind {
                    $(PayloadKind::$variant => deserialize::<$variant>(bytes).map(Payload::$variant),)*
                }
            }
        }

        $(
            impl From<$variant> for Payload {
                fn from(body: $variant) -> Self {
                    Payload::$variant(body)
                }
            }

            impl TryFrom<Payload> for $variant {
                type Error = Payload;

                fn try_from(payload: Payload) -> Result<Self, Payload> {
                    match payload {
                        Payload::$variant(body) => Ok(body),
                        other => Err(other),
                    }
                }
            }

            impl Message for $variant {
                const KIND: PayloadKind = PayloadKind::$variant;
            }
        )*
    };
}

payloads! {
    AllocRequest => "executor.AllocRequest",
    AllocResponse => "executor.AllocResponse",
    DeallocRequest => "executor.DeallocRequest",
    DeallocResponse => "executor.DeallocResponse",
    CreateSessionRequest => "executor.CreateSessionRequest",
    CreateSessionResponse => "executor.CreateSessionResponse",
    CloseSessionRequest => "executor.CloseSessionRequest",
    CloseSessionResponse => "executor.CloseSessionResponse",
    RunRequest => "executor.RunRequest",
    RunResponse => "executor.RunResponse",
    RendezRecvRequest => "executor.RendezRecvRequest",
    RendezRecvUpdate => "executor.RendezRecvUpdate",
    FetchRequest => "executor.FetchRequest",
    FetchResponse => "executor.FetchResponse",
    PushRequest => "executor.PushRequest",
    PushResponse => "executor.PushResponse",
    CustomRequest => "executor.CustomRequest",
    CustomResponse => "executor.CustomResponse",
}

impl PayloadKind {
    pub fn from_type_name(name: &str) -> Option<PayloadKind> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.type_name() == name)
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Payload {
    pub fn type_name(&self) -> &'static str {
        self.kind().type_name()
    }

    /// Converts into a concrete body type, handing the payload back on mismatch.
    pub fn into_message<M: Message>(self) -> Result<M, Payload> {
        M::try_from(self)
    }
}
