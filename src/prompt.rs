//! Operator interaction.
//!
//! The pipeline only knows whether a [`ResolutionPrompter`] is present
//! (attended run) or not (unattended run). Answer validation is shared by every
//! prompter through [`ask_validated`].

use core::fmt::{self, Display};
use std::collections::VecDeque;
use std::io::{self, Stdout, Write};
use std::path::Path;

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};

use crate::sid::SecurityIdentifier;
use crate::volume::DefaultIdentity;

/// Kind of mapping an identifier is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Found as a file owner: the answer maps both user and group.
    Owner,
    /// Found as a file group or in an ACL: the answer maps a group only.
    Group,
}

impl Display for Role {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Owner => "owner",
            Self::Group => "group",
        })
    }
}

/// An unresolved identifier, with the file it was found on.
#[derive(Debug, Clone, Copy)]
pub struct MappingRequest<'a> {
    /// Identifier to map.
    pub sid: &'a SecurityIdentifier,
    /// Profile directory the file lives under, if any.
    pub account: Option<&'a str>,
    /// File carrying the identifier, relative to the volume root.
    pub path: &'a Path,
    /// Whether a user or a group id is expected.
    pub role: Role,
}

/// Source of operator answers.
///
/// Answers are returned raw; trimming and rejection are done by
/// [`ask_validated`]. `Ok(None)` means the input is exhausted.
pub trait ResolutionPrompter {
    /// Asks for the Unix id of an identifier.
    ///
    /// # Errors
    /// Any I/O failure of the underlying terminal.
    fn ask_mapping(&mut self, request: &MappingRequest<'_>) -> io::Result<Option<String>>;

    /// Tells the operator an answer was refused before asking again.
    ///
    /// # Errors
    /// Any I/O failure of the underlying terminal.
    #[inline]
    fn rejected(&mut self, _answer: &str) -> io::Result<()> {
        Ok(())
    }

    /// Asks whether a standard group may be defined when no group was mapped.
    ///
    /// # Errors
    /// Any I/O failure of the underlying terminal.
    fn accept_standard_group(&mut self) -> io::Result<bool>;

    /// Asks for the Unix login standing in for the current account when no
    /// owner was mapped.
    ///
    /// # Errors
    /// Any I/O failure of the underlying terminal.
    fn ask_default_owner(&mut self, identity: &DefaultIdentity) -> io::Result<Option<String>>;

    /// Announces that a volume is about to be scanned.
    ///
    /// # Errors
    /// Any I/O failure of the underlying terminal.
    #[inline]
    fn scanning(&mut self, _volume: &Path, _levels: u32) -> io::Result<()> {
        Ok(())
    }
}

impl<P: ResolutionPrompter + ?Sized> ResolutionPrompter for &mut P {
    #[inline]
    fn ask_mapping(&mut self, request: &MappingRequest<'_>) -> io::Result<Option<String>> {
        (**self).ask_mapping(request)
    }

    #[inline]
    fn rejected(&mut self, answer: &str) -> io::Result<()> {
        (**self).rejected(answer)
    }

    #[inline]
    fn accept_standard_group(&mut self) -> io::Result<bool> {
        (**self).accept_standard_group()
    }

    #[inline]
    fn ask_default_owner(&mut self, identity: &DefaultIdentity) -> io::Result<Option<String>> {
        (**self).ask_default_owner(identity)
    }

    #[inline]
    fn scanning(&mut self, volume: &Path, levels: u32) -> io::Result<()> {
        (**self).scanning(volume, levels)
    }
}

/// Whether an answer would map an account to the superuser.
///
/// Administrators are mapped automatically by the driver, so neither `root`
/// nor a zero id is accepted.
#[inline]
#[must_use]
pub fn is_rejected(answer: &str) -> bool {
    answer == "root" || (!answer.is_empty() && answer.bytes().all(|b| b == b'0'))
}

/// Asks until the answer is blank or acceptable.
///
/// Returns `None` when the operator defers (blank answer or end of input).
///
/// # Errors
/// Propagates prompter failures.
pub fn ask_validated<P: ResolutionPrompter + ?Sized>(
    prompter: &mut P,
    request: &MappingRequest<'_>,
) -> io::Result<Option<String>> {
    loop {
        let Some(raw) = prompter.ask_mapping(request)? else {
            return Ok(None);
        };
        let answer = raw.trim();
        if answer.is_empty() {
            return Ok(None);
        }
        if !is_rejected(answer) {
            return Ok(Some(answer.to_owned()));
        }
        prompter.rejected(answer)?;
    }
}

/// Interactive prompter: explanations go to `output`, questions are asked on
/// the terminal with [`dialoguer`].
#[derive(Debug)]
pub struct ConsolePrompter<W> {
    output: W,
}

impl ConsolePrompter<Stdout> {
    /// Prompter over the process terminal.
    #[inline]
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(io::stdout())
    }
}

fn terminal_error(err: dialoguer::Error) -> io::Error {
    io::Error::other(err)
}

impl<W: Write> ConsolePrompter<W> {
    /// Prompter explaining its questions on `output`.
    #[inline]
    pub const fn new(output: W) -> Self {
        Self { output }
    }

    /// Prints the opening explanation.
    ///
    /// # Errors
    /// Any write failure.
    pub fn greet(&mut self) -> io::Result<()> {
        writeln!(self.output)?;
        writeln!(
            self.output,
            "This tool will help you to build a mapping of Windows users"
        )?;
        writeln!(self.output, "to Linux users.")?;
        writeln!(
            self.output,
            "Be prepared to give Linux user id (uid) and group id (gid)"
        )?;
        writeln!(self.output, "for owners of files which will be selected.")?;
        self.output.flush()
    }

    /// Consumes the prompter, returning its writer.
    #[inline]
    pub fn into_inner(self) -> W {
        self.output
    }

    /// Describes the file an identifier was found on.
    fn explain_mapping(&mut self, request: &MappingRequest<'_>) -> io::Result<()> {
        let id_kind = match request.role {
            Role::Owner => "uid",
            Role::Group => "gid",
        };
        writeln!(self.output)?;
        if let Some(account) = request.account {
            writeln!(self.output, "Under Windows login \"{account}\"")?;
        }
        writeln!(
            self.output,
            "   file \"{}\" has no mapped {}",
            request.path.display(),
            request.role
        )?;
        writeln!(self.output, "By which Linux login should this file be owned ?")?;
        writeln!(
            self.output,
            "Enter {id_kind} of login, or just press \"enter\" if this file"
        )?;
        writeln!(
            self.output,
            "does not belong to a user, or you do not known to whom"
        )?;
        self.output.flush()
    }

    fn explain_default_owner(&mut self, identity: &DefaultIdentity) -> io::Result<()> {
        writeln!(self.output)?;
        writeln!(
            self.output,
            "Your current user name is {}",
            identity.account.name
        )?;
        writeln!(self.output, "Your account domain is {}", identity.account.domain)?;
        writeln!(self.output, "You have defined no file owner,")?;
        writeln!(
            self.output,
            "   please enter the Linux login which should be mapped"
        )?;
        writeln!(self.output, "   to account you are currently using")?;
        self.output.flush()
    }

    fn read_text(prompt: &str) -> io::Result<String> {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
            .map_err(terminal_error)
    }
}

impl<W: Write> ResolutionPrompter for ConsolePrompter<W> {
    fn ask_mapping(&mut self, request: &MappingRequest<'_>) -> io::Result<Option<String>> {
        self.explain_mapping(request)?;
        let label = match request.role {
            Role::Owner => "User",
            Role::Group => "Group",
        };
        Self::read_text(label).map(Some)
    }

    fn rejected(&mut self, _answer: &str) -> io::Result<()> {
        writeln!(self.output, "Please do not map users to root")?;
        writeln!(self.output, "Administrators will be mapped automatically")?;
        writeln!(self.output, "Please retry")
    }

    fn accept_standard_group(&mut self) -> io::Result<bool> {
        writeln!(self.output)?;
        writeln!(
            self.output,
            "You have defined no group, this can cause problems"
        )?;
        self.output.flush()?;
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Do you accept defining a standard group ?")
            .default(true)
            .interact()
            .map_err(terminal_error)
    }

    fn ask_default_owner(&mut self, identity: &DefaultIdentity) -> io::Result<Option<String>> {
        self.explain_default_owner(identity)?;
        Self::read_text("Linux user").map(Some)
    }

    fn scanning(&mut self, volume: &Path, levels: u32) -> io::Result<()> {
        writeln!(self.output)?;
        writeln!(
            self.output,
            "* Scanning \"{}\" ({levels} levels)",
            volume.display()
        )
    }
}

/// Prompter replaying canned answers, for tests and batch runs.
///
/// Once its answers run out it behaves like a closed terminal: mappings are
/// deferred and the standard group is accepted.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    confirmations: VecDeque<bool>,
    default_owner: Option<String>,
    asked: Vec<String>,
    rejections: Vec<String>,
}

impl ScriptedPrompter {
    /// Replays `answers` to mapping questions, in order.
    #[inline]
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Replays `confirmations` to the standard group question.
    #[inline]
    #[must_use]
    pub fn with_confirmations<I: IntoIterator<Item = bool>>(mut self, confirmations: I) -> Self {
        self.confirmations = confirmations.into_iter().collect();
        self
    }

    /// Answers the default owner question with `login`.
    #[inline]
    #[must_use]
    pub fn with_default_owner(mut self, login: impl Into<String>) -> Self {
        self.default_owner = Some(login.into());
        self
    }

    /// Canonical text of every identifier asked about, in order.
    #[inline]
    #[must_use]
    pub fn asked(&self) -> &[String] {
        &self.asked
    }

    /// Answers that were refused.
    #[inline]
    #[must_use]
    pub fn rejections(&self) -> &[String] {
        &self.rejections
    }
}

impl ResolutionPrompter for ScriptedPrompter {
    #[inline]
    fn ask_mapping(&mut self, request: &MappingRequest<'_>) -> io::Result<Option<String>> {
        self.asked.push(request.sid.to_string());
        Ok(self.answers.pop_front())
    }

    #[inline]
    fn rejected(&mut self, answer: &str) -> io::Result<()> {
        self.rejections.push(answer.to_owned());
        Ok(())
    }

    #[inline]
    fn accept_standard_group(&mut self) -> io::Result<bool> {
        Ok(self.confirmations.pop_front().unwrap_or(true))
    }

    #[inline]
    fn ask_default_owner(&mut self, _identity: &DefaultIdentity) -> io::Result<Option<String>> {
        Ok(self.default_owner.take())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unwrap is not an issue in test")]
mod tests {
    use super::*;
    use crate::volume::DomainAndName;

    fn request(sid: &SecurityIdentifier) -> MappingRequest<'_> {
        MappingRequest {
            sid,
            account: Some("alice"),
            path: Path::new("Users/alice"),
            role: Role::Owner,
        }
    }

    #[test]
    fn superuser_answers() {
        assert!(is_rejected("0"));
        assert!(is_rejected("000"));
        assert!(is_rejected("root"));
        assert!(!is_rejected("1000"));
        assert!(!is_rejected("rooted"));
        assert!(!is_rejected(""));
    }

    #[test]
    fn rejected_answers_are_asked_again() {
        let sid: SecurityIdentifier = "S-1-5-21-1-2-3-1001".parse().unwrap();
        let mut prompter = ScriptedPrompter::new(["0", " root ", " 1000 "]);
        let answer = ask_validated(&mut prompter, &request(&sid)).unwrap();
        assert_eq!(answer.as_deref(), Some("1000"));
        assert_eq!(prompter.rejections(), ["0", "root"]);
        assert_eq!(prompter.asked().len(), 3);
    }

    #[test]
    fn blank_or_exhausted_defers() {
        let sid: SecurityIdentifier = "S-1-5-21-1-2-3-1001".parse().unwrap();
        let mut prompter = ScriptedPrompter::new(["   "]);
        assert_eq!(ask_validated(&mut prompter, &request(&sid)).unwrap(), None);
        assert_eq!(ask_validated(&mut prompter, &request(&sid)).unwrap(), None);
    }

    #[test]
    fn console_explains_requests() {
        let sid: SecurityIdentifier = "S-1-5-21-1-2-3-1001".parse().unwrap();
        let mut prompter = ConsolePrompter::new(Vec::new());
        prompter.explain_mapping(&request(&sid)).unwrap();
        prompter.rejected("root").unwrap();
        let output = String::from_utf8(prompter.into_inner()).unwrap();
        assert!(output.contains("Under Windows login \"alice\""), "{output}");
        assert!(output.contains("file \"Users/alice\" has no mapped owner"), "{output}");
        assert!(output.contains("Enter uid of login"), "{output}");
        assert!(output.contains("Please do not map users to root"), "{output}");
    }

    #[test]
    fn console_explains_default_owner() {
        let identity = DefaultIdentity {
            sid: "S-1-5-21-1-2-3-1001".parse().unwrap(),
            account: DomainAndName::new("HOST", "alice"),
        };
        let mut prompter = ConsolePrompter::new(Vec::new());
        prompter.explain_default_owner(&identity).unwrap();
        prompter.scanning(Path::new("C:"), 2).unwrap();
        let output = String::from_utf8(prompter.into_inner()).unwrap();
        assert!(output.contains("Your current user name is alice"), "{output}");
        assert!(output.contains("Your account domain is HOST"), "{output}");
        assert!(output.ends_with("* Scanning \"C:\" (2 levels)\n"), "{output}");
    }
}
