//! Conversion logic between DTOs and domain types.

use crate::{
    domain::{StoreError, WriteBatch},
    infrastructure::{
        dto::websocket::{ErrorCode, ErrorDto, ResponsePayload, WriteDto},
        memory::CompareAndSetOutcome,
    },
};

// ========================================
// Domain → DTO
// ========================================

impl From<&StoreError> for ErrorDto {
    fn from(error: &StoreError) -> Self {
        let message = error.to_string();
        let (code, path, reason, attempts) = match error {
            StoreError::AlreadyExists(path) => (ErrorCode::AlreadyExists, Some(path.clone()), None, None),
            StoreError::PermissionDenied { path, reason } => (
                ErrorCode::PermissionDenied,
                Some(path.clone()),
                Some(reason.clone()),
                None,
            ),
            StoreError::Unauthenticated => (ErrorCode::Unauthenticated, None, None, None),
            StoreError::InvalidPath { path, reason } => (
                ErrorCode::InvalidPath,
                Some(path.clone()),
                Some(reason.clone()),
                None,
            ),
            StoreError::TransactionConflict { path, attempts } => (
                ErrorCode::TransactionConflict,
                Some(path.clone()),
                None,
                Some(*attempts),
            ),
            StoreError::Disconnected => (ErrorCode::Disconnected, None, None, None),
            StoreError::Transport(detail) => (ErrorCode::Transport, None, Some(detail.clone()), None),
        };
        Self {
            code,
            message,
            path,
            reason,
            attempts,
        }
    }
}

impl From<StoreError> for ErrorDto {
    fn from(error: StoreError) -> Self {
        Self::from(&error)
    }
}

impl From<CompareAndSetOutcome> for ResponsePayload {
    fn from(outcome: CompareAndSetOutcome) -> Self {
        ResponsePayload::CompareAndSet {
            committed: outcome.committed,
            current: outcome.current,
        }
    }
}

impl From<WriteBatch> for Vec<WriteDto> {
    fn from(batch: WriteBatch) -> Self {
        batch
            .into_writes()
            .into_iter()
            .map(|(path, value)| WriteDto { path, value })
            .collect()
    }
}

// ========================================
// DTO → Domain
// ========================================

impl From<ErrorDto> for StoreError {
    fn from(dto: ErrorDto) -> Self {
        let path = dto.path.unwrap_or_default();
        match dto.code {
            ErrorCode::AlreadyExists => StoreError::AlreadyExists(path),
            ErrorCode::PermissionDenied => StoreError::PermissionDenied {
                path,
                reason: dto.reason.unwrap_or(dto.message),
            },
            ErrorCode::Unauthenticated => StoreError::Unauthenticated,
            ErrorCode::InvalidPath => StoreError::InvalidPath {
                path,
                reason: dto.reason.unwrap_or(dto.message),
            },
            ErrorCode::TransactionConflict => StoreError::TransactionConflict {
                path,
                attempts: dto.attempts.unwrap_or_default(),
            },
            ErrorCode::Disconnected => StoreError::Disconnected,
            ErrorCode::Transport => StoreError::Transport(dto.reason.unwrap_or(dto.message)),
            ErrorCode::BadRequest => StoreError::Transport(dto.message),
        }
    }
}

impl From<Vec<WriteDto>> for WriteBatch {
    fn from(writes: Vec<WriteDto>) -> Self {
        let mut batch = WriteBatch::new();
        for write in writes {
            batch.push(write.path, write.value);
        }
        batch
    }
}
