//! Bounds checks applied before a command reaches a store.

use rampart_constants::api::MAX_TTL_MS;
use rampart_constants::MAX_KEY_SIZE;
use rampart_constants::MAX_VALUE_SIZE;

use crate::KeyValueStoreError;
use crate::WriteCommand;

/// Reject empty or oversized keys.
pub fn validate_key(key: &str) -> Result<(), KeyValueStoreError> {
    if key.is_empty() {
        return Err(KeyValueStoreError::EmptyKey);
    }
    if key.len() > MAX_KEY_SIZE as usize {
        return Err(KeyValueStoreError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), KeyValueStoreError> {
    if value.len() > MAX_VALUE_SIZE as usize {
        return Err(KeyValueStoreError::ValueTooLarge {
            size: value.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

fn validate_ttl(ttl_ms: u64) -> Result<(), KeyValueStoreError> {
    if ttl_ms == 0 || ttl_ms > MAX_TTL_MS {
        return Err(KeyValueStoreError::InvalidTtl {
            ttl_ms,
            max_ms: MAX_TTL_MS,
        });
    }
    Ok(())
}

/// Validate a write command against the API bounds.
pub fn validate_write_command(command: &WriteCommand) -> Result<(), KeyValueStoreError> {
    validate_key(command.key())?;
    match command {
        WriteCommand::Set { value, .. } => validate_value(value),
        WriteCommand::SetWithTTL { value, ttl_ms, .. } => {
            validate_value(value)?;
            validate_ttl(*ttl_ms)
        }
        WriteCommand::SetIfAbsent { value, ttl_ms, .. } => {
            validate_value(value)?;
            ttl_ms.map_or(Ok(()), validate_ttl)
        }
        WriteCommand::CompareAndSwap { new_value, ttl_ms, .. } => {
            validate_value(new_value)?;
            ttl_ms.map_or(Ok(()), validate_ttl)
        }
        WriteCommand::Expire { ttl_ms, .. } => validate_ttl(*ttl_ms),
        WriteCommand::CompareAndDelete { .. } | WriteCommand::Delete { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WriteRequest;

    #[test]
    fn rejects_empty_key() {
        assert_eq!(validate_key(""), Err(KeyValueStoreError::EmptyKey));
    }

    #[test]
    fn rejects_oversized_key() {
        let key = "k".repeat(MAX_KEY_SIZE as usize + 1);
        assert!(matches!(validate_key(&key), Err(KeyValueStoreError::KeyTooLarge { .. })));
        assert!(validate_key(&"k".repeat(MAX_KEY_SIZE as usize)).is_ok());
    }

    #[test]
    fn rejects_oversized_value() {
        let value = "v".repeat(MAX_VALUE_SIZE as usize + 1);
        let cmd = WriteRequest::set("k", value).command;
        assert!(matches!(
            validate_write_command(&cmd),
            Err(KeyValueStoreError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_zero_and_huge_ttl() {
        let zero = WriteRequest::set_with_ttl("k", "v", 0).command;
        assert!(matches!(validate_write_command(&zero), Err(KeyValueStoreError::InvalidTtl { .. })));

        let huge = WriteRequest::expire("k", MAX_TTL_MS + 1).command;
        assert!(matches!(validate_write_command(&huge), Err(KeyValueStoreError::InvalidTtl { .. })));

        let none = WriteRequest::compare_and_swap("k", None, "v", None).command;
        assert!(validate_write_command(&none).is_ok());
    }
}
