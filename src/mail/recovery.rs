use super::OutgoingMail;

/// Mail carrying a freshly generated password to `to`.
pub fn recovery_mail(app_name: &str, from: &str, to: &str, new_password: &str) -> OutgoingMail {
    OutgoingMail {
        subject: format!("[{app_name}] Password recovery"),
        body: format!(
            "Your password has been reset.\n\nNew password: {new_password}\n\n\
             Sign in and change it from your profile."
        ),
        from: from.to_string(),
        to: vec![to.to_string()],
        html_body: Some(format!(
            "<p>Your password has been reset.</p>\
             <p>New password: <strong>{new_password}</strong></p>\
             <p>Sign in and change it from your profile.</p>"
        )),
    }
}
