// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Argument sanitization.
//!
//! Turns a caller-supplied argument string into a normalized token sequence
//! or rejects it with a specific [`ValidationError`]. Tokenization is
//! POSIX-style splitting with quoting and **no** expansion, substitution, or
//! globbing. Every token must satisfy the character grammar, every flag must
//! be on the descriptor's allow-list, and value-bearing flags consume their
//! value inline (`--flag=value`) or from the next token (`--flag value`) —
//! both forms normalize to the same two-token sequence.
//!
//! Payload placeholders (`^USER^`, `^PASS^`) matching the descriptor's
//! pattern pass through byte-for-byte; they are never rewritten.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::descriptor::ToolDescriptor;
use crate::domain::errors::ValidationError;

/// Shell control and metacharacters rejected anywhere in the argument string.
pub const DENIED_CHARS: [char; 9] = [';', '&', '|', '`', '$', '<', '>', '\r', '\n'];

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9.:/=+,\-@%_]+$").expect("token regex"))
}

fn flag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-{1,2}[A-Za-z0-9][A-Za-z0-9.\-]*(=.*)?$").expect("flag regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenShape {
    Flag,
    Plain,
    Placeholder,
}

fn classify(token: &str, descriptor: &ToolDescriptor) -> Result<TokenShape, ValidationError> {
    if flag_regex().is_match(token) {
        // An inline value may itself carry a placeholder.
        if let Some((_, value)) = token.split_once('=') {
            if !value.is_empty() && !token_regex().is_match(value) && !is_placeholder(value, descriptor)
            {
                return Err(ValidationError::TokenNotPermitted(token.to_string()));
            }
        }
        return Ok(TokenShape::Flag);
    }
    if token_regex().is_match(token) {
        return Ok(TokenShape::Plain);
    }
    if is_placeholder(token, descriptor) {
        return Ok(TokenShape::Placeholder);
    }
    Err(ValidationError::TokenNotPermitted(token.to_string()))
}

fn is_placeholder(token: &str, descriptor: &ToolDescriptor) -> bool {
    descriptor
        .payload_pattern
        .as_ref()
        .is_some_and(|re| re.is_match(token))
}

/// Sanitize an argument string against a tool descriptor.
///
/// Returns the normalized token sequence, ordering preserved. The result is
/// stable: feeding the joined output back through `sanitize` yields the same
/// sequence.
pub fn sanitize(
    extra_args: &str,
    descriptor: &ToolDescriptor,
    max_args_len: usize,
) -> Result<Vec<String>, ValidationError> {
    if extra_args.len() > max_args_len {
        return Err(ValidationError::ArgsTooLong {
            len: extra_args.len(),
            max: max_args_len,
        });
    }
    if let Some(ch) = extra_args.chars().find(|c| DENIED_CHARS.contains(c)) {
        return Err(ValidationError::DeniedCharacter(ch));
    }

    let tokens = shell_words::split(extra_args).map_err(|_| ValidationError::MalformedQuoting)?;

    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    let mut pending_value_for: Option<String> = None;
    let mut seen_flags: BTreeSet<String> = BTreeSet::new();

    for token in tokens {
        let shape = classify(&token, descriptor)?;

        // A value-bearing flag consumes the next token regardless of shape;
        // the per-flag rule decides whether it is acceptable.
        if let Some(flag) = pending_value_for.take() {
            let normalized = apply_value_rule(&flag, &token, descriptor)?;
            out.push(normalized.unwrap_or(token));
            continue;
        }

        match shape {
            TokenShape::Flag => {
                let base = ToolDescriptor::flag_base(&token).to_string();
                if !descriptor.is_flag_allowed(&base) {
                    return Err(ValidationError::FlagNotAllowed(base));
                }
                if descriptor.forbid_duplicate_flags && !seen_flags.insert(base.clone()) {
                    return Err(ValidationError::DuplicateFlag(base));
                }

                if descriptor.requires_value(&base) {
                    match token.split_once('=') {
                        Some((_, value)) if !value.is_empty() => {
                            let normalized = apply_value_rule(&base, value, descriptor)?;
                            out.push(base);
                            out.push(normalized.unwrap_or_else(|| value.to_string()));
                        }
                        Some(_) => return Err(ValidationError::MissingValue(base)),
                        None => {
                            out.push(base.clone());
                            pending_value_for = Some(base);
                        }
                    }
                } else {
                    if token.contains('=') {
                        return Err(ValidationError::InvalidValue {
                            flag: base,
                            reason: "flag does not take a value".to_string(),
                        });
                    }
                    out.push(token);
                }
            }
            TokenShape::Plain | TokenShape::Placeholder => {
                if descriptor.extra_allowed_tokens.contains(token.as_str())
                    || is_placeholder(&token, descriptor)
                {
                    out.push(token);
                } else {
                    return Err(ValidationError::TokenNotPermitted(token));
                }
            }
        }
    }

    if let Some(flag) = pending_value_for {
        return Err(ValidationError::MissingValue(flag));
    }

    Ok(out)
}

fn apply_value_rule(
    flag: &str,
    value: &str,
    descriptor: &ToolDescriptor,
) -> Result<Option<String>, ValidationError> {
    match descriptor.value_rule(flag) {
        Some(rule) => rule.validate(flag, value, descriptor),
        None => Ok(None),
    }
}
