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

/// Matches a `topic` against a subscription `pattern`.
///
/// A pattern may contain:
/// - `*` - match 0 or more characters
/// - `?` - match any character once
/// - any other character - match that character exactly
///
/// Runs in linear time by remembering only the most recent `*` position.
#[must_use]
pub fn is_matching(topic: &[u8], pattern: &[u8]) -> bool {
    let (mut t, mut p) = (0, 0);
    // (pattern index after the last '*', topic index it was tried against)
    let mut star: Option<(usize, usize)> = None;

    while t < topic.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == topic[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p + 1, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            // Let the last '*' absorb one more character
            p = star_p;
            t = star_t + 1;
            star = Some((star_p, t));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
