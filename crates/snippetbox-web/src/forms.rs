use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// HTML5 email pattern (WHATWG).
static EMAIL_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email regex is valid")
});

const BLANK: &str = "This field cannot be blank";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnippetForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub expires: String,
    #[serde(default, skip_serializing)]
    pub csrf_token: String,
    #[serde(default, skip_deserializing)]
    pub errors: HashMap<String, String>,
}

impl SnippetForm {
    pub fn validate(&mut self) -> bool {
        if self.title.trim().is_empty() {
            self.errors.insert("title".into(), BLANK.into());
        } else if self.title.chars().count() > 100 {
            self.errors.insert(
                "title".into(),
                "This field is too long (maximum is 100 characters)".into(),
            );
        }

        if self.content.trim().is_empty() {
            self.errors.insert("content".into(), BLANK.into());
        }

        if !matches!(self.expires.as_str(), "365" | "7" | "1") {
            self.errors
                .insert("expires".into(), "This field is invalid".into());
        }

        self.errors.is_empty()
    }

    pub fn expires_days(&self) -> u32 {
        self.expires.parse().unwrap_or(365)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignupForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing)]
    pub csrf_token: String,
    #[serde(default, skip_deserializing)]
    pub errors: HashMap<String, String>,
}

impl SignupForm {
    pub fn validate(&mut self) -> bool {
        if self.name.trim().is_empty() {
            self.errors.insert("name".into(), BLANK.into());
        }

        if self.email.trim().is_empty() {
            self.errors.insert("email".into(), BLANK.into());
        } else if !EMAIL_RX.is_match(&self.email) {
            self.errors
                .insert("email".into(), "This field is invalid".into());
        }

        if self.password.trim().is_empty() {
            self.errors.insert("password".into(), BLANK.into());
        } else if self.password.chars().count() < 10 {
            self.errors.insert(
                "password".into(),
                "This field is too short (minimum is 10 characters)".into(),
            );
        }

        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing)]
    pub csrf_token: String,
    /// Form-wide errors ("Email or Password is incorrect") that must not
    /// reveal which half was wrong.
    #[serde(default, skip_deserializing)]
    pub non_field_errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_snippet_form() {
        let mut form = SnippetForm {
            title: "O snail".into(),
            content: "Climb Mount Fuji".into(),
            expires: "7".into(),
            ..Default::default()
        };
        assert!(form.validate());
        assert_eq!(form.expires_days(), 7);
    }

    #[test]
    fn snippet_form_field_errors() {
        let mut form = SnippetForm {
            title: "x".repeat(101),
            content: String::new(),
            expires: "14".into(),
            ..Default::default()
        };
        assert!(!form.validate());
        assert!(form.errors["title"].contains("too long"));
        assert_eq!(form.errors["content"], BLANK);
        assert_eq!(form.errors["expires"], "This field is invalid");
    }

    #[test]
    fn title_of_exactly_100_chars_is_fine() {
        let mut form = SnippetForm {
            title: "x".repeat(100),
            content: "body".into(),
            expires: "1".into(),
            ..Default::default()
        };
        assert!(form.validate());
    }

    #[test]
    fn signup_form_rules() {
        let mut form = SignupForm {
            name: String::new(),
            email: "not-an-email".into(),
            password: "short".into(),
            ..Default::default()
        };
        assert!(!form.validate());
        assert_eq!(form.errors["name"], BLANK);
        assert_eq!(form.errors["email"], "This field is invalid");
        assert!(form.errors["password"].contains("too short"));

        let mut ok = SignupForm {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            password: "pa$$word1234".into(),
            ..Default::default()
        };
        assert!(ok.validate());
    }
}
