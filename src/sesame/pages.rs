//! HTML views.

use super::{forms::FormErrors, session::Flash};
use std::fmt::Write;

/// Escape text for use in HTML element content and quoted attributes.
#[must_use]
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, flashes: &[Flash], body: &str) -> String {
    let mut messages = String::new();
    for flash in flashes {
        let _ = write!(
            messages,
            r#"<div class="alert alert-{}" role="alert">{}</div>"#,
            flash.level.as_str(),
            escape(&flash.message)
        );
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
</head>
<body>
<main>
{messages}
{body}
</main>
</body>
</html>
"#,
        title = escape(title),
    )
}

/// A labelled input followed by its validation errors.
struct Field<'a> {
    name: &'static str,
    label: &'static str,
    kind: &'static str,
    value: &'a str,
}

impl Field<'_> {
    fn render(&self, errors: &FormErrors, out: &mut String) {
        let _ = write!(
            out,
            r#"<div class="field"><label for="{name}">{label}</label><input id="{name}" name="{name}" type="{kind}" value="{value}" required>"#,
            name = self.name,
            label = self.label,
            kind = self.kind,
            value = escape(self.value),
        );
        for error in errors.field(self.name) {
            let _ = write!(out, r#"<span class="error">{}</span>"#, escape(error));
        }
        out.push_str("</div>\n");
    }
}

fn form(
    action: &str,
    csrf_token: &str,
    fields: &[Field<'_>],
    errors: &FormErrors,
    submit: &str,
) -> String {
    let mut out = format!(r#"<form method="post" action="{action}">"#);
    out.push('\n');
    if !csrf_token.is_empty() {
        let _ = writeln!(
            out,
            r#"<input type="hidden" name="csrf_token" value="{}">"#,
            escape(csrf_token)
        );
    }
    for error in errors.field("csrf_token") {
        let _ = writeln!(out, r#"<span class="error">{}</span>"#, escape(error));
    }
    for field in fields {
        field.render(errors, &mut out);
    }
    let _ = write!(out, r#"<button type="submit">{submit}</button></form>"#);
    out
}

/// Registration page. Only the username is echoed back; password inputs are always empty.
#[must_use]
pub fn register(
    username: &str,
    errors: &FormErrors,
    csrf_token: &str,
    flashes: &[Flash],
) -> String {
    let fields = [
        Field {
            name: "username",
            label: "Username",
            kind: "text",
            value: username,
        },
        Field {
            name: "password",
            label: "Password",
            kind: "password",
            value: "",
        },
        Field {
            name: "confirm_password",
            label: "Confirm Password",
            kind: "password",
            value: "",
        },
    ];

    let body = format!(
        "<h1>Register</h1>\n{}\n<p>Already have an account? <a href=\"/login\">Sign in</a></p>",
        form("/register", csrf_token, &fields, errors, "Sign Up")
    );
    layout("Register", flashes, &body)
}

#[must_use]
pub fn login(
    username: &str,
    errors: &FormErrors,
    csrf_token: &str,
    flashes: &[Flash],
) -> String {
    let fields = [
        Field {
            name: "username",
            label: "Username",
            kind: "text",
            value: username,
        },
        Field {
            name: "password",
            label: "Password",
            kind: "password",
            value: "",
        },
    ];

    let body = format!(
        "<h1>Login</h1>\n{}\n<p>No account yet? <a href=\"/register\">Sign up</a></p>",
        form("/login", csrf_token, &fields, errors, "Sign In")
    );
    layout("Login", flashes, &body)
}

#[must_use]
pub fn index(username: &str, flashes: &[Flash]) -> String {
    let body = format!(
        "<h1>Welcome, {}!</h1>\n<p><a href=\"/logout\">Logout</a></p>",
        escape(username)
    );
    layout("Home", flashes, &body)
}
