use std::fmt;

use thiserror::Error;

use crate::element::ElementType;

/// Machine-readable status codes, numbered like ONNX Runtime's `OrtErrorCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok = 0,
    Fail = 1,
    InvalidArgument = 2,
    NoSuchFile = 3,
    NoModel = 4,
    EngineError = 5,
    RuntimeException = 6,
    InvalidProtobuf = 7,
    ModelLoaded = 8,
    NotImplemented = 9,
    InvalidGraph = 10,
    EpFail = 11,
}

impl ErrorCode {
    /// Maps a raw engine status code. Unknown values collapse to `Fail`.
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            2 => Self::InvalidArgument,
            3 => Self::NoSuchFile,
            4 => Self::NoModel,
            5 => Self::EngineError,
            6 => Self::RuntimeException,
            7 => Self::InvalidProtobuf,
            8 => Self::ModelLoaded,
            9 => Self::NotImplemented,
            10 => Self::InvalidGraph,
            11 => Self::EpFail,
            _ => Self::Fail,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "Ok",
            Self::Fail => "Fail",
            Self::InvalidArgument => "InvalidArgument",
            Self::NoSuchFile => "NoSuchFile",
            Self::NoModel => "NoModel",
            Self::EngineError => "EngineError",
            Self::RuntimeException => "RuntimeException",
            Self::InvalidProtobuf => "InvalidProtobuf",
            Self::ModelLoaded => "ModelLoaded",
            Self::NotImplemented => "NotImplemented",
            Self::InvalidGraph => "InvalidGraph",
            Self::EpFail => "EpFail",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by session, tensor and record operations.
#[derive(Debug, Error)]
pub enum OrtError {
    #[error("[ErrorCode:{code}] Load model failed: {message}")]
    ModelLoad { code: ErrorCode, message: String },

    #[error("[ErrorCode:InvalidArgument] {0}")]
    InvalidOption(String),

    #[error("[ErrorCode:InvalidArgument] Invalid Feed Input Name:{0}")]
    InvalidInputName(String),

    #[error("[ErrorCode:InvalidArgument] Missing Input: {0}")]
    MissingInput(String),

    #[error("[ErrorCode:InvalidArgument] Invalid Output Name:{0}")]
    InvalidOutputName(String),

    #[error(
        "[ErrorCode:InvalidArgument] Unexpected input data type for {name}. Actual: ({actual}) , expected: ({expected})"
    )]
    InvalidInputType {
        name: String,
        expected: String,
        actual: String,
    },

    #[error(
        "[ErrorCode:InvalidArgument] Got invalid dimensions for input: {name}. Expected: {expected:?}, got: {actual:?}"
    )]
    InvalidInputShape {
        name: String,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("[ErrorCode:{code}] {message}")]
    Engine { code: ErrorCode, message: String },

    #[error("[ErrorCode:Fail] Exiting due to terminate flag being set to true.")]
    Terminated,

    #[error("[ErrorCode:NotImplemented] unsupported element type: {0}")]
    UnsupportedType(ElementType),

    #[error("[ErrorCode:InvalidArgument] unknown element type tag: {0}")]
    UnknownElementType(i32),

    #[error("[ErrorCode:InvalidArgument] value type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("[ErrorCode:InvalidArgument] invalid tensor shape: {0:?}")]
    InvalidShape(Vec<i64>),

    #[error("[ErrorCode:InvalidArgument] shape {shape:?} needs {expected} elements, got {got}")]
    DataLength {
        shape: Vec<i64>,
        expected: usize,
        got: usize,
    },

    #[error("[ErrorCode:InvalidArgument] invalid tensor record: {0}")]
    InvalidRecord(String),

    #[error("[ErrorCode:InvalidArgument] empty data")]
    EmptyData,

    #[error("[ErrorCode:Fail] io: {0}")]
    Io(#[from] std::io::Error),
}

impl OrtError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ModelLoad { code, .. } | Self::Engine { code, .. } => *code,
            Self::Terminated | Self::Io(_) => ErrorCode::Fail,
            Self::UnsupportedType(_) => ErrorCode::NotImplemented,
            _ => ErrorCode::InvalidArgument,
        }
    }

    /// Reports whether the error belongs to the invalid-input-name class:
    /// an undeclared or duplicate feed, or a declared input left unfed.
    pub fn is_invalid_input_name(&self) -> bool {
        matches!(self, Self::InvalidInputName(_) | Self::MissingInput(_))
    }

    pub(crate) fn model_load(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::ModelLoad {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn engine(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Engine {
            code,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrtError>;
