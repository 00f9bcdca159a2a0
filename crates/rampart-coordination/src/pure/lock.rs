//! Lock name templating.
//!
//! Templates name the resource a lock protects, e.g.
//! `invoice:{invoice_id}:payout`. Placeholder values are percent-escaped so
//! that they can never contain `:`, `{`, `}` or a bare `%`. Two placeholders
//! must be separated by a `:`, which makes rendering injective: distinct
//! argument values never produce the same lock name.

use crate::error::CoordinationError;

/// Characters escaped inside placeholder values.
const ESCAPED: [char; 4] = ['%', ':', '{', '}'];

/// Percent-escape one segment of a colon-separated key.
pub fn escape_key_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ESCAPED.contains(&ch) {
            out.push_str(&format!("%{:02X}", ch as u32));
        } else {
            out.push(ch);
        }
    }
    out
}

/// Render `template` with `args`.
///
/// Every `{name}` placeholder must have a matching argument. Extra
/// arguments are ignored.
///
/// # Errors
///
/// `InvalidLockTemplate` for an unbalanced brace, an empty or unknown
/// placeholder, or two placeholders not separated by `:`.
pub fn render_lock_name(template: &str, args: &[(&str, &str)]) -> Result<String, CoordinationError> {
    let invalid = |reason: String| CoordinationError::InvalidLockTemplate {
        template: template.to_string(),
        reason,
    };

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    // Whether a ':' has been emitted since the last placeholder.
    let mut separated = true;

    while let Some(open) = rest.find(['{', '}']) {
        let (literal, tail) = rest.split_at(open);
        out.push_str(literal);
        if literal.contains(':') {
            separated = true;
        }
        if tail.starts_with('}') {
            return Err(invalid("unmatched '}'".into()));
        }

        let close = tail.find('}').ok_or_else(|| invalid("unclosed '{'".into()))?;
        let name = &tail[1..close];
        if name.is_empty() || name.contains('{') {
            return Err(invalid("empty or nested placeholder".into()));
        }
        if !separated {
            return Err(invalid(format!("placeholder '{name}' must be separated from the previous one by ':'")));
        }
        let value = args
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| invalid(format!("no argument for placeholder '{name}'")))?;

        out.push_str(&escape_key_segment(value));
        separated = false;
        rest = &tail[close + 1..];
    }
    out.push_str(rest);

    if out.is_empty() {
        return Err(invalid("renders to an empty name".into()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn renders_placeholders() {
        let name = render_lock_name("invoice:{id}:payout", &[("id", "42")]).unwrap();
        assert_eq!(name, "invoice:42:payout");
    }

    #[test]
    fn escapes_separator_characters() {
        let name = render_lock_name("user:{id}", &[("id", "a:b{c}%")]).unwrap();
        assert_eq!(name, "user:a%3Ab%7Bc%7D%25");
    }

    #[test]
    fn colliding_raw_values_render_differently() {
        // Unescaped, both would be "job:a:b:c".
        let a = render_lock_name("job:{x}:{y}", &[("x", "a:b"), ("y", "c")]).unwrap();
        let b = render_lock_name("job:{x}:{y}", &[("x", "a"), ("y", "b:c")]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn missing_argument_is_rejected() {
        let err = render_lock_name("job:{id}", &[("other", "1")]).unwrap_err();
        assert!(matches!(err, CoordinationError::InvalidLockTemplate { .. }));
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for template in ["job:{id", "job:id}", "job:{}", "job:{a}{b}", "{a}-{b}", ""] {
            let result = render_lock_name(template, &[("id", "1"), ("a", "1"), ("b", "2")]);
            assert!(result.is_err(), "template {template:?} should be rejected");
        }
    }

    #[test]
    fn static_template_needs_no_args() {
        assert_eq!(render_lock_name("nightly-report", &[]).unwrap(), "nightly-report");
    }

    proptest! {
        #[test]
        fn rendering_is_injective(
            a1 in ".{0,12}", b1 in ".{0,12}",
            a2 in ".{0,12}", b2 in ".{0,12}",
        ) {
            let r1 = render_lock_name("res:{a}:{b}", &[("a", &a1), ("b", &b1)]).unwrap();
            let r2 = render_lock_name("res:{a}:{b}", &[("a", &a2), ("b", &b2)]).unwrap();
            prop_assert_eq!(r1 == r2, a1 == a2 && b1 == b2);
        }
    }
}
