// src/dag/env.rs

//! Shell-style variable expansion and environment composition.
//!
//! Steps see the parent process environment, plus their own `env` entries,
//! plus output variables captured by predecessors. Expansion understands
//! `${NAME}` and the positional parameters `$1`..`$9`.

use std::collections::HashMap;

/// Expand `${NAME}` references from `vars` and `$1`..`$9` from `params`
/// (where `params[0]` is `$1`). Unknown names expand to the empty string.
pub fn expand(input: &str, vars: &HashMap<String, String>, params: &[String]) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        match chars.peek() {
            Some(&(start, '{')) => {
                // ${NAME}
                if let Some(end) = input[start..].find('}') {
                    let name = &input[start + 1..start + end];
                    if let Some(value) = vars.get(name) {
                        out.push_str(value);
                    }
                    // Skip past the closing brace.
                    while let Some(&(i, _)) = chars.peek() {
                        if i > start + end {
                            break;
                        }
                        chars.next();
                    }
                } else {
                    out.push('$');
                }
            }
            Some(&(_, d)) if d.is_ascii_digit() && d != '0' => {
                let idx = d.to_digit(10).unwrap() as usize;
                if let Some(value) = params.get(idx - 1) {
                    out.push_str(value);
                }
                chars.next();
            }
            _ => out.push('$'),
        }
    }

    out
}

/// Snapshot of the parent process environment.
pub fn base_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Layer a step's own `env` entries on top of `vars`, expanding each value
/// against what is already visible.
pub fn apply_step_env(
    vars: &mut HashMap<String, String>,
    env: &[(String, String)],
    params: &[String],
) {
    for (key, value) in env {
        let expanded = expand(value, vars, params);
        vars.insert(key.clone(), expanded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn expands_braced_names() {
        let v = vars(&[("FOO", "bar")]);
        assert_eq!(expand("x ${FOO} y", &v, &[]), "x bar y");
        assert_eq!(expand("${MISSING}", &v, &[]), "");
    }

    #[test]
    fn expands_positional_params() {
        let params = vec!["one".to_string(), "two".to_string()];
        assert_eq!(expand("$1-$2-$3", &HashMap::new(), &params), "one-two-");
    }

    #[test]
    fn leaves_bare_dollars_alone() {
        let v = vars(&[("A", "1")]);
        assert_eq!(expand("cost: $ 5", &v, &[]), "cost: $ 5");
        assert_eq!(expand("trailing $", &v, &[]), "trailing $");
        assert_eq!(expand("${unterminated", &v, &[]), "${unterminated");
    }

    #[test]
    fn step_env_values_see_earlier_entries() {
        let mut v = vars(&[("ROOT", "/srv")]);
        apply_step_env(
            &mut v,
            &[
                ("DATA".to_string(), "${ROOT}/data".to_string()),
                ("LOGS".to_string(), "${DATA}/logs".to_string()),
            ],
            &[],
        );
        assert_eq!(v["DATA"], "/srv/data");
        assert_eq!(v["LOGS"], "/srv/data/logs");
    }
}
