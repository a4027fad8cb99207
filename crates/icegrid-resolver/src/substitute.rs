//! `${name}` token expansion
//!
//! A run of `n` dollar signs followed by `{` emits `n / 2` dollars. With an
//! even run the brace is literal text; with an odd run the last dollar opens
//! a token that extends to the next `}`.

use crate::error::ResolveError;
use crate::UnresolvedPolicy;

/// Expand every token in `input` with `lookup`
///
/// Single pass: text produced by `lookup` is never re-scanned.
pub(crate) fn expand<F>(
    input: &str,
    policy: UnresolvedPolicy,
    mut lookup: F,
) -> Result<String, ResolveError>
where
    F: FnMut(&str) -> Option<String>,
{
    if !input.contains('$') {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let run = rest[pos..].bytes().take_while(|b| *b == b'$').count();
        let after = &rest[pos + run..];

        if !after.starts_with('{') {
            push_dollars(&mut out, run);
            rest = after;
            continue;
        }

        push_dollars(&mut out, run / 2);
        if run % 2 == 0 {
            // Escaped: the brace is emitted as plain text on the next pass
            rest = after;
            continue;
        }

        let body = &after[1..];
        let Some(end) = body.find('}') else {
            return match policy {
                UnresolvedPolicy::Reject => Err(ResolveError::Malformed {
                    input: input.to_string(),
                }),
                UnresolvedPolicy::Literal => {
                    out.push('$');
                    out.push_str(after);
                    Ok(out)
                }
            };
        };

        let name = &body[..end];
        if name.is_empty() {
            if policy == UnresolvedPolicy::Reject {
                return Err(ResolveError::Malformed {
                    input: input.to_string(),
                });
            }
            out.push_str("${}");
        } else {
            match lookup(name) {
                Some(value) => out.push_str(&value),
                None if policy == UnresolvedPolicy::Reject => {
                    return Err(ResolveError::Undefined {
                        name: name.to_string(),
                    });
                }
                None => {
                    out.push_str("${");
                    out.push_str(name);
                    out.push('}');
                }
            }
        }
        rest = &body[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn push_dollars(out: &mut String, count: usize) {
    out.extend(std::iter::repeat('$').take(count));
}
