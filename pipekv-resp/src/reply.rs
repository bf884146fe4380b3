/// RESP2 reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK` or `+PONG` style responses.
    Simple(Vec<u8>),
    /// `-ERR ...` responses.
    Error(Vec<u8>),
    /// `:123` responses.
    Integer(i64),
    /// `$...` bulk strings, with `None` for null.
    Bulk(Option<Vec<u8>>),
    /// `*...` arrays.
    Array(Vec<Reply>),
}

impl Default for Reply {
    fn default() -> Self {
        Reply::Bulk(None)
    }
}

impl Reply {
    /// Flattens the reply into a list of display tokens.
    ///
    /// Arrays recurse in order; every other variant contributes one token,
    /// with binary data rendered lossily as UTF-8. Intended for diagnostics,
    /// not for interpreting replies.
    pub fn flatten_into(&self, out: &mut Vec<String>) {
        match self {
            Reply::Simple(text) | Reply::Error(text) => {
                out.push(String::from_utf8_lossy(text).into_owned());
            }
            Reply::Integer(value) => out.push(value.to_string()),
            Reply::Bulk(Some(data)) => out.push(String::from_utf8_lossy(data).into_owned()),
            Reply::Bulk(None) => out.push(String::new()),
            Reply::Array(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
        }
    }
}
