//! `${…}` template substitution for request URLs, bodies and header values.
//!
//! Supported tokens: `random.uuid`, `random.email`, `random.bool`,
//! `random.int(a,b)` (inclusive), `random.float(a,b)` (4 decimal places),
//! `random.string(n)` (alphanumeric), `random.choice(a,b,…)`, `var.key` and
//! bare `key` variable lookups. Unrecognised or malformed tokens pass
//! through unchanged.

use rand::distr::Alphanumeric;
use rand::Rng;
use regex::{Captures, Regex};
use std::collections::HashMap;

pub struct Generator {
    variables: HashMap<String, String>,
    token: Regex,
}

impl Generator {
    pub fn new(variables: HashMap<String, String>) -> Self {
        Self {
            variables,
            token: Regex::new(r"\$\{([^}]+)\}").expect("token pattern"),
        }
    }

    /// Replaces every `${…}` token in `template` with its computed value.
    pub fn generate(&self, template: &str) -> String {
        self.token
            .replace_all(template, |caps: &Captures<'_>| {
                self.evaluate(caps[1].trim())
            })
            .into_owned()
    }

    fn evaluate(&self, token: &str) -> String {
        match token {
            "random.uuid" => return uuid::Uuid::new_v4().to_string(),
            "random.email" => return random_email(),
            "random.bool" => return rand::rng().random_bool(0.5).to_string(),
            _ => {}
        }

        if token.starts_with("random.int(") {
            return self.eval_random_int(token);
        }
        if token.starts_with("random.float(") {
            return self.eval_random_float(token);
        }
        if token.starts_with("random.string(") {
            return self.eval_random_string(token);
        }
        if token.starts_with("random.choice(") {
            return self.eval_random_choice(token);
        }
        if let Some(key) = token.strip_prefix("var.") {
            return match self.variables.get(key) {
                Some(value) => value.clone(),
                None => passthrough(token),
            };
        }
        match self.variables.get(token) {
            Some(value) => value.clone(),
            None => passthrough(token),
        }
    }

    fn eval_random_int(&self, token: &str) -> String {
        let Some((lo, hi)) = parse_pair(token, "random.int(") else {
            return passthrough(token);
        };
        let (Ok(lo), Ok(hi)) = (lo.parse::<i64>(), hi.parse::<i64>()) else {
            return passthrough(token);
        };
        if hi < lo {
            return passthrough(token);
        }
        rand::rng().random_range(lo..=hi).to_string()
    }

    fn eval_random_float(&self, token: &str) -> String {
        let Some((lo, hi)) = parse_pair(token, "random.float(") else {
            return passthrough(token);
        };
        let (Ok(lo), Ok(hi)) = (lo.parse::<f64>(), hi.parse::<f64>()) else {
            return passthrough(token);
        };
        if hi < lo {
            return passthrough(token);
        }
        format!("{:.4}", rand::rng().random_range(lo..=hi))
    }

    fn eval_random_string(&self, token: &str) -> String {
        let Some(args) = parse_args(token, "random.string(") else {
            return passthrough(token);
        };
        let Ok(n) = args.trim().parse::<usize>() else {
            return passthrough(token);
        };
        if n == 0 {
            return passthrough(token);
        }
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(n)
            .map(char::from)
            .collect()
    }

    fn eval_random_choice(&self, token: &str) -> String {
        let Some(args) = parse_args(token, "random.choice(") else {
            return passthrough(token);
        };
        let choices: Vec<&str> = args.split(',').map(str::trim).collect();
        if choices.is_empty() {
            return passthrough(token);
        }
        let idx = rand::rng().random_range(0..choices.len());
        choices[idx].to_string()
    }
}

/// Reconstructs an unresolvable token verbatim.
fn passthrough(token: &str) -> String {
    format!("${{{token}}}")
}

fn parse_args<'a>(token: &'a str, prefix: &str) -> Option<&'a str> {
    token.strip_prefix(prefix)?.strip_suffix(')')
}

fn parse_pair<'a>(token: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let args = parse_args(token, prefix)?;
    let (lo, hi) = args.split_once(',')?;
    Some((lo.trim(), hi.trim()))
}

fn random_email() -> String {
    const WORDS: [&str; 8] = [
        "alice", "bob", "carol", "dave", "eve", "frank", "grace", "hank",
    ];
    const DOMAINS: [&str; 4] = ["example.com", "test.org", "mail.net", "demo.io"];

    let mut rng = rand::rng();
    let word = WORDS[rng.random_range(0..WORDS.len())];
    let n: u32 = rng.random_range(1000..=9999);
    let domain = DOMAINS[rng.random_range(0..DOMAINS.len())];
    format!("{word}{n}@{domain}")
}
