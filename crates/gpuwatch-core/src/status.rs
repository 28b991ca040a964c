// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Translation of native hardware codes into the engine's [`FetchError`] taxonomy.
//!
//! The mapping is total: every native code lands on exactly one error kind,
//! with [`FetchError::UnknownError`] as the catch-all.

use crate::error::{FetchError, FetchResult};
use crate::hardware::{HwResult, HwStatus};

/// Maps one native failure code to its engine error kind.
pub fn translate(status: HwStatus) -> FetchError {
    match status {
        HwStatus::InvalidArgs => FetchError::BadParameter,
        HwStatus::NotSupported => FetchError::NotSupported,
        HwStatus::NotFound => FetchError::NotFound,
        HwStatus::OutOfResources => FetchError::InsufficientResources,
        HwStatus::FileError => FetchError::FileError,
        HwStatus::NoData => FetchError::NoData,
        HwStatus::Permission => FetchError::PermissionError,
        HwStatus::Busy
        | HwStatus::UnknownError
        | HwStatus::InternalException
        | HwStatus::InputOutOfBounds
        | HwStatus::InitError
        | HwStatus::NotYetImplemented
        | HwStatus::InsufficientSize
        | HwStatus::Interrupt
        | HwStatus::UnexpectedSize
        | HwStatus::UnexpectedData
        | HwStatus::RefcountOverflow
        | HwStatus::Other(_) => FetchError::UnknownError,
    }
}

/// Translates the failure side of a hardware result, keeping the success value.
pub fn translate_result<T>(result: HwResult<T>) -> FetchResult<T> {
    result.map_err(translate)
}

/// Translates a raw numeric status code (`0` is success).
pub fn translate_code(code: u32) -> FetchResult<()> {
    match HwStatus::from_code(code) {
        None => Ok(()),
        Some(status) => Err(translate(status)),
    }
}

impl From<HwStatus> for FetchError {
    fn from(status: HwStatus) -> Self {
        translate(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedicated_codes_map_one_to_one() {
        let cases = [
            (HwStatus::InvalidArgs, FetchError::BadParameter),
            (HwStatus::NotSupported, FetchError::NotSupported),
            (HwStatus::NotFound, FetchError::NotFound),
            (HwStatus::OutOfResources, FetchError::InsufficientResources),
            (HwStatus::FileError, FetchError::FileError),
            (HwStatus::NoData, FetchError::NoData),
            (HwStatus::Permission, FetchError::PermissionError),
        ];
        for (native, expected) in cases {
            assert_eq!(translate(native), expected, "{native:?}");
        }
    }

    #[test]
    fn every_numeric_code_translates() {
        assert_eq!(translate_code(0), Ok(()));
        for code in 1..64 {
            assert!(translate_code(code).is_err(), "code {code}");
        }
        assert_eq!(translate_code(u32::MAX), Err(FetchError::UnknownError));
    }

    #[test]
    fn unmapped_codes_fall_back_to_unknown() {
        for native in [
            HwStatus::Busy,
            HwStatus::InternalException,
            HwStatus::InitError,
            HwStatus::Interrupt,
            HwStatus::RefcountOverflow,
            HwStatus::Other(99),
        ] {
            assert_eq!(translate(native), FetchError::UnknownError);
        }
    }

    #[test]
    fn question_mark_converts_native_failures() {
        fn call() -> FetchResult<u32> {
            let value: HwResult<u32> = Err(HwStatus::Permission);
            Ok(value?)
        }
        assert_eq!(call(), Err(FetchError::PermissionError));
        assert_eq!(translate_result(Ok::<_, HwStatus>(7)), Ok(7));
    }
}
