//! git-credential helper protocol IO.
//!
//! git talks to credential helpers with `key=value` lines on stdin and
//! expects the same shape back on stdout; the requested operation is the
//! last program argument. See
//! <https://git-scm.com/docs/git-credential#IOFMT>.

use std::io::{BufRead, Write};

use crate::{Error, Result};

/// Operation requested by git.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialAction {
    /// Produce a credential
    Get,
    /// Persist a credential (ignored by this helper)
    Store,
    /// Drop a credential (ignored by this helper)
    Erase,
}

impl CredentialAction {
    /// Parse the action from the program's argument list; git passes it as
    /// the last argument.
    ///
    /// # Errors
    ///
    /// Fails on anything other than `get`, `store`, or `erase`.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let action = args.last().map(AsRef::as_ref).unwrap_or_default();
        match action {
            "get" => Ok(Self::Get),
            "store" => Ok(Self::Store),
            "erase" => Ok(Self::Erase),
            other => Err(Error::BadRequest(format!(
                "unable to process git-credential action '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for CredentialAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "get",
            Self::Store => "store",
            Self::Erase => "erase",
        })
    }
}

/// Fields git sends on stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRequest {
    /// URL scheme, e.g. `https`
    pub protocol: String,
    /// Host the credential is for
    pub host: String,
    /// Repository path; requires `useHttpPath` in git config
    pub path: String,
    /// Username, when git already knows one
    pub username: String,
    /// Password, when git already knows one
    pub password: String,
}

impl CredentialRequest {
    /// Read `key=value` lines until EOF.
    ///
    /// Unknown keys are ignored, leaving room for future protocol additions.
    ///
    /// # Errors
    ///
    /// Fails on a line without `=` or on a read error.
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        let mut request = Self::default();

        for line in reader.lines() {
            let line = line?;
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::BadRequest(format!(
                    "unable to parse git credential input line: '{line}' - not enough parameters"
                )));
            };
            match key {
                "protocol" => request.protocol = value.to_string(),
                "host" => request.host = value.to_string(),
                "path" => request.path = value.to_string(),
                "username" => request.username = value.to_string(),
                "password" => request.password = value.to_string(),
                _ => {}
            }
        }

        Ok(request)
    }
}

/// Fields the helper sends back to git.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialResponse {
    /// Username for the remote
    pub username: String,
    /// Password or token for the remote
    pub password: String,
    /// When set, git consults no further helpers and never prompts
    pub quit: bool,
}

impl CredentialResponse {
    /// Write the response in git's `key=value` format.
    ///
    /// # Errors
    ///
    /// Fails on a write error.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(writer, "username={}", self.username)?;
        writeln!(writer, "password={}", self.password)?;
        if self.quit {
            writeln!(writer, "quit=true")?;
        }
        Ok(())
    }
}
