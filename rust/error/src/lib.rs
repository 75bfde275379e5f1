// Defines a small set of error codes shared by every Quiver component.
// Component error enums map onto these codes so callers can handle errors
// generically without matching on each concrete enum.
use std::error::Error;

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum ErrorCodes {
    // OK is returned on success, we use "Success" since Ok is a keyword in Rust.
    Success = 0,
    // UNKNOWN indicates an unknown error.
    Unknown = 1,
    // INVALID_ARGUMENT indicates the caller specified an invalid argument.
    InvalidArgument = 2,
    // NOT_FOUND means a requested record or file was not found.
    NotFound = 3,
    // ALREADY_EXISTS means an entity we attempted to create already exists.
    AlreadyExists = 4,
    // RESOURCE_EXHAUSTED indicates a size or capacity bound was exceeded.
    ResourceExhausted = 5,
    // FAILED_PRECONDITION indicates the component is not in a state required
    // for the operation (not initialized, closed, quantizer untrained).
    FailedPrecondition = 6,
    // OUT_OF_RANGE means an operation was attempted past the valid range.
    OutOfRange = 7,
    // INTERNAL errors are internal errors.
    Internal = 8,
    // DATA_LOSS indicates unrecoverable corruption in a durable format.
    DataLoss = 9,
}

impl ErrorCodes {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCodes::InvalidArgument => "InvalidArgumentError",
            ErrorCodes::NotFound => "NotFoundError",
            ErrorCodes::FailedPrecondition => "FailedPreconditionError",
            ErrorCodes::DataLoss => "DataLossError",
            ErrorCodes::Internal => "InternalError",
            _ => "QuiverError",
        }
    }
}

pub trait QuiverError: Error + Send {
    fn code(&self) -> ErrorCodes;
    fn boxed(self) -> Box<dyn QuiverError>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl Error for Box<dyn QuiverError> {}

impl QuiverError for Box<dyn QuiverError> {
    fn code(&self) -> ErrorCodes {
        self.as_ref().code()
    }
}

impl QuiverError for std::io::Error {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::Unknown
    }
}
