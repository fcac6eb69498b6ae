// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

//! Version numbers as they appear in summary files: dotted numeric parts,
//! an optional `_name[number]` prerelease qualifier, and an optional
//! trailing wildcard (`1.*`, `1.0_*`, `1.0_rc*`, or a bare `*`).

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::errors::VersionError;

/// Rank of the known qualifier names; everything else gets -1 and refuses
/// to be ordered.
fn qualifier_order(name: &str) -> i32 {
    match name {
        "pre" => 0,
        "alpha" => 1,
        "beta" => 2,
        "rc" => 3,
        _ => -1,
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Qualifier {
    /// The `_*` form: a wildcard that accepts any qualifier.
    Any,
    Named {
        order: i32,
        number: u64,
        name: String,
    },
}

/// A parsed version number.
///
/// Use `==` for an exact semantic match (`1.0.0` equals `1`, `1_final`
/// equals `1`), [`VersionNumber::contains`] for a wildcard match, and the
/// comparison operators for ordering. Ordering is only defined between two
/// concrete, non-empty versions with recognized qualifiers; everything else
/// is reported through [`VersionNumber::compare`].
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct VersionNumber {
    parts: Vec<u64>,
    qualifier: Option<Qualifier>,
    wildcard: bool,
}

impl VersionNumber {
    pub fn parse(text: &str) -> Result<VersionNumber, VersionError> {
        let invalid = || VersionError::Unparseable {
            text: text.to_string(),
        };

        // A trailing * marks a wildcard; strip it along with any trailing
        // dots so that "1.*", "1*" and "*" all reduce to their base.
        let wildcard = text.ends_with('*');
        let base = text.trim_end_matches(|c| c == '.' || c == '*');

        if base.is_empty() {
            return Ok(VersionNumber {
                parts: Vec::new(),
                qualifier: None,
                wildcard,
            });
        }

        // Only the last dotted component may carry a _qualifier suffix.
        let mut components: Vec<&str> = base.split('.').collect();
        let last = components.pop().unwrap_or("");
        let (last, qualifier_body) = match last.split_once('_') {
            Some((head, body)) => (head, Some(body)),
            None => (last, None),
        };

        let mut parts = Vec::with_capacity(components.len() + 1);
        for component in components {
            parts.push(component.parse::<u64>().map_err(|_| invalid())?);
        }
        parts.push(last.parse::<u64>().map_err(|_| invalid())?);

        // Strip trailing zeros so that 1.0 == 1.0.0. Skipped for wildcards,
        // where the written depth is significant: 1.1 is not in 1.0.*, and
        // 2.0.1 is not in 2.0_*. Qualified versions still strip, so that
        // 1.1_pre == 1.1.0_pre.
        if !wildcard {
            while parts.len() > 1 && parts.last() == Some(&0) {
                parts.pop();
            }
        }

        let qualifier = match qualifier_body {
            None => None,
            // The body is empty when the input was "..._*".
            Some("") if wildcard => Some(Qualifier::Any),
            // _final is the same as no qualifier at all.
            Some("final") => None,
            Some(body) => {
                let name = body.trim_end_matches(|c: char| c.is_ascii_digit());
                let number = if name.len() == body.len() {
                    0
                } else {
                    body[name.len()..].parse::<u64>().map_err(|_| invalid())?
                };
                // "1.0_rc2*" asks for a wildcard on a fully specified
                // qualifier, which leaves nothing to match.
                if wildcard && number != 0 {
                    return Err(invalid());
                }
                Some(Qualifier::Named {
                    order: qualifier_order(name),
                    number,
                    name: name.to_string(),
                })
            }
        };

        Ok(VersionNumber {
            parts,
            qualifier,
            wildcard,
        })
    }

    pub(crate) fn empty() -> VersionNumber {
        VersionNumber {
            parts: Vec::new(),
            qualifier: None,
            wildcard: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && !self.wildcard
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Wildcard or exact-match containment: `other` is accepted by this
    /// pattern. A non-wildcard pattern accepts only its semantic equal.
    pub fn contains(&self, other: &VersionNumber) -> bool {
        if !self.wildcard {
            return self == other;
        }
        self.wildcard_match(other)
    }

    /// True if this version is accepted by any of the given patterns.
    pub fn in_any<'a, I>(&self, patterns: I) -> bool
    where
        I: IntoIterator<Item = &'a VersionNumber>,
    {
        patterns.into_iter().any(|pattern| pattern.contains(self))
    }

    fn wildcard_match(&self, other: &VersionNumber) -> bool {
        if !self.wildcard {
            return false;
        }

        // A blank wildcard matches everything, including blank versions;
        // a non-blank wildcard matches no blank version.
        if self.parts.is_empty() {
            return true;
        }
        if other.parts.is_empty() {
            return false;
        }

        // 1.* does not match 1.0_pre, and 1.0_* does not match 1.0.
        if self.qualifier.is_some() != other.qualifier.is_some() {
            return false;
        }

        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            match (self.parts.get(i), other.parts.get(i)) {
                // The wildcard ran out: 1.* matches 1.2.3, but 1.1_*
                // does not match 1.1.3_alpha.
                (None, Some(_)) => return self.qualifier.is_none(),
                // The candidate ran out: 1.0.0.* matches 1.0, but
                // 1.0.1.* does not.
                (Some(&mine), None) => {
                    if mine != 0 {
                        return false;
                    }
                }
                (Some(&mine), Some(&yours)) => {
                    if mine != yours {
                        return false;
                    }
                }
                (None, None) => break,
            }
        }

        match (&self.qualifier, &other.qualifier) {
            // Without a qualifier this is an exact match for the base
            // version: 1.1.* matches 1.1.
            (None, _) => true,
            // 1.0_* matches 1.0_beta.
            (Some(Qualifier::Any), _) => true,
            // 1.0_pre* matches 1.0_pre3 but not 1.0_alpha.
            (
                Some(Qualifier::Named { name: mine, .. }),
                Some(Qualifier::Named { name: yours, .. }),
            ) => mine == yours,
            (Some(Qualifier::Named { .. }), _) => false,
        }
    }

    /// Checked ordering. Empty versions, wildcards, and unrecognized
    /// qualifier names cannot be ordered and report a [`VersionError`].
    pub fn compare(&self, other: &VersionNumber) -> Result<Ordering, VersionError> {
        if self.parts.is_empty() || other.parts.is_empty() {
            return Err(VersionError::EmptyComparison);
        }
        if self.wildcard || other.wildcard {
            return Err(VersionError::WildcardComparison);
        }

        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            match (self.parts.get(i), other.parts.get(i)) {
                (None, Some(_)) => return Ok(Ordering::Less),
                (Some(_), None) => return Ok(Ordering::Greater),
                (Some(mine), Some(yours)) => {
                    if mine != yours {
                        return Ok(mine.cmp(yours));
                    }
                }
                (None, None) => break,
            }
        }

        // The numeric parts matched; a qualified version sorts below the
        // same version without one (1.0_pre < 1.0 == 1.0_final).
        match (&self.qualifier, &other.qualifier) {
            (None, None) => Ok(Ordering::Equal),
            (Some(_), None) => Ok(Ordering::Less),
            (None, Some(_)) => Ok(Ordering::Greater),
            (
                Some(Qualifier::Named {
                    order: my_order,
                    number: my_number,
                    name: my_name,
                }),
                Some(Qualifier::Named {
                    order: your_order,
                    number: your_number,
                    name: your_name,
                }),
            ) => {
                if *my_order == -1 {
                    return Err(VersionError::UnknownQualifier {
                        name: my_name.clone(),
                    });
                }
                if *your_order == -1 {
                    return Err(VersionError::UnknownQualifier {
                        name: your_name.clone(),
                    });
                }
                Ok((my_order, my_number).cmp(&(your_order, your_number)))
            }
            // Qualifier::Any only arises on wildcards, which were
            // rejected above.
            (Some(Qualifier::Any), _) | (_, Some(Qualifier::Any)) => {
                Err(VersionError::WildcardComparison)
            }
        }
    }
}

impl FromStr for VersionNumber {
    type Err = VersionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        VersionNumber::parse(value)
    }
}

impl PartialOrd for VersionNumber {
    fn partial_cmp(&self, other: &VersionNumber) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl PartialEq<str> for VersionNumber {
    fn eq(&self, other: &str) -> bool {
        match VersionNumber::parse(other) {
            Ok(version) => *self == version,
            Err(_) => false,
        }
    }
}

impl PartialEq<&str> for VersionNumber {
    fn eq(&self, other: &&str) -> bool {
        <VersionNumber as PartialEq<str>>::eq(self, other)
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.wildcard && self.parts.is_empty() {
            return write!(f, "*");
        }

        let base = self
            .parts
            .iter()
            .map(|part| part.to_string())
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{}", base)?;

        match (&self.qualifier, self.wildcard) {
            (Some(Qualifier::Any), _) => write!(f, "_*"),
            (Some(Qualifier::Named { name, .. }), true) => write!(f, "_{}*", name),
            (None, true) => write!(f, ".*"),
            (Some(Qualifier::Named { name, number, .. }), false) => {
                // _pre is preferred over _pre0.
                if *number != 0 {
                    write!(f, "_{}{}", name, number)
                } else {
                    write!(f, "_{}", name)
                }
            }
            (None, false) => Ok(()),
        }
    }
}
