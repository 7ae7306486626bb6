// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Tether Contributors. All rights reserved.
//  https://github.com/tether-rs/tether
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Functions for correctness checks similar to the *design by contract* philosophy.
//!
//! An [`anyhow::Result`] is returned with a descriptive message when the
//! condition check fails.

/// A message prefix that can be used with calls to `expect` or other assertion-related functions.
pub const FAILED: &str = "Condition failed";

/// Checks the `predicate` is true.
///
/// # Errors
///
/// Returns an error if the validation check fails.
#[inline(always)]
pub fn check_predicate_true(predicate: bool, fail_msg: &str) -> anyhow::Result<()> {
    if !predicate {
        anyhow::bail!("{fail_msg}")
    }
    Ok(())
}

/// Checks the string `s` is not empty and contains no whitespace.
///
/// # Errors
///
/// Returns an error if:
/// - `s` is empty.
/// - `s` contains any whitespace character.
#[inline(always)]
pub fn check_nonempty_string<T: AsRef<str>>(s: T, param: &str) -> anyhow::Result<()> {
    let s = s.as_ref();
    if s.is_empty() {
        anyhow::bail!("invalid string for '{param}', was empty");
    }
    if s.chars().any(char::is_whitespace) {
        anyhow::bail!("invalid string for '{param}' contained whitespace, was '{s}'");
    }
    Ok(())
}

/// Checks the string `s` is a valid ASCII identifier-like value.
///
/// # Errors
///
/// Returns an error if:
/// - `s` fails [`check_nonempty_string`].
/// - `s` contains a non-ASCII character.
#[inline(always)]
pub fn check_valid_string_ascii<T: AsRef<str>>(s: T, param: &str) -> anyhow::Result<()> {
    let s = s.as_ref();
    check_nonempty_string(s, param)?;
    if !s.is_ascii() {
        anyhow::bail!("invalid string for '{param}' contained a non-ASCII char, was '{s}'");
    }
    Ok(())
}

/// Checks the `value` lies within the inclusive range `[l, r]`.
///
/// # Errors
///
/// Returns an error if `value` is outside the range or is NaN.
#[inline(always)]
pub fn check_in_range_inclusive_f64(value: f64, l: f64, r: f64, param: &str) -> anyhow::Result<()> {
    if value.is_nan() || value < l || value > r {
        anyhow::bail!("invalid f64 for '{param}' not in range [{l}, {r}], was {value}")
    }
    Ok(())
}
