use super::ErrorCode;

pub fn all_codes() -> &'static [ErrorCode] {
    &[
        ErrorCode::ConfigMissingKey,
        ErrorCode::ConfigInvalidJson,
        ErrorCode::ConfigInvalidValue,
        ErrorCode::ValidationInvalidArgument,
        ErrorCode::SshIdentityFileNotFound,
        ErrorCode::RemoteCommandFailed,
        ErrorCode::RemoteCommandTimeout,
        ErrorCode::PlatformApiError,
        ErrorCode::PlatformAuthFailed,
        ErrorCode::PlatformMergeConflict,
        ErrorCode::PlatformRequestFailed,
        ErrorCode::ModuleNotRegistered,
        ErrorCode::AssemblyFailed,
        ErrorCode::SasProgramFailed,
        ErrorCode::InternalIoError,
        ErrorCode::InternalJsonError,
        ErrorCode::InternalUnexpected,
    ]
}

pub fn parse_code(code: &str) -> Option<ErrorCode> {
    all_codes()
        .iter()
        .copied()
        .find(|candidate| candidate.as_str() == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_round_trips_through_its_string() {
        for code in all_codes() {
            assert_eq!(parse_code(code.as_str()), Some(*code));
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(parse_code("deploy.upload_failed"), None);
    }
}
