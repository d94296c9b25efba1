use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of a single turn. `Streaming` is re-entered on every chunk;
/// `Completed` and `Errored` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Pending,
    Streaming,
    Completed,
    Errored,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Completed | TurnState::Errored)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    role: Role,
    content: String,
    state: TurnState,
}

impl ConversationTurn {
    fn user(content: String) -> Self {
        Self {
            role: Role::User,
            content,
            state: TurnState::Completed,
        }
    }

    fn placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            state: TurnState::Pending,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_error(&self) -> bool {
        self.state == TurnState::Errored
    }

    pub fn is_in_progress(&self) -> bool {
        !self.state.is_terminal()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("a turn is still in progress")]
    TurnInProgress,
    #[error("no turn is in progress")]
    NoTurnInProgress,
}

/// Ordered turns of one conversation. Only the trailing turn may be in
/// progress, and only an in-progress turn is ever modified.
#[derive(Debug, Default)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn in_progress(&self) -> Option<&ConversationTurn> {
        self.turns.last().filter(|turn| turn.is_in_progress())
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> Result<(), LogError> {
        self.ensure_idle()?;
        self.turns.push(ConversationTurn::user(content.into()));
        Ok(())
    }

    pub fn begin_assistant(&mut self) -> Result<(), LogError> {
        self.ensure_idle()?;
        self.turns.push(ConversationTurn::placeholder());
        Ok(())
    }

    pub fn stream_content(&mut self, content: &str) -> Result<(), LogError> {
        let turn = self.in_progress_mut()?;
        turn.content.clear();
        turn.content.push_str(content);
        turn.state = TurnState::Streaming;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), LogError> {
        self.in_progress_mut()?.state = TurnState::Completed;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), LogError> {
        let turn = self.in_progress_mut()?;
        turn.content = message.into();
        turn.state = TurnState::Errored;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn ensure_idle(&self) -> Result<(), LogError> {
        match self.in_progress() {
            Some(_) => Err(LogError::TurnInProgress),
            None => Ok(()),
        }
    }

    fn in_progress_mut(&mut self) -> Result<&mut ConversationTurn, LogError> {
        self.turns
            .last_mut()
            .filter(|turn| turn.is_in_progress())
            .ok_or(LogError::NoTurnInProgress)
    }
}

#[cfg(test)]
pub(crate) fn assert_single_trailing_in_progress(log: &ConversationLog) {
    let turns = log.turns();
    let in_progress: Vec<usize> = turns
        .iter()
        .enumerate()
        .filter(|(_, turn)| turn.is_in_progress())
        .map(|(idx, _)| idx)
        .collect();
    assert!(in_progress.len() <= 1, "more than one turn in progress: {:?}", in_progress);
    if let Some(idx) = in_progress.first() {
        assert_eq!(*idx, turns.len() - 1, "in-progress turn is not last");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_streams_then_completes() {
        let mut log = ConversationLog::new();
        log.push_user("What is a balanced breakfast?").unwrap();
        log.begin_assistant().unwrap();

        let turn = log.in_progress().unwrap();
        assert_eq!(turn.state(), TurnState::Pending);
        assert_eq!(turn.content(), "");

        log.stream_content("Oats").unwrap();
        log.stream_content("Oats and fruit").unwrap();
        assert_eq!(log.last().unwrap().state(), TurnState::Streaming);
        assert_single_trailing_in_progress(&log);

        log.complete().unwrap();
        let turn = log.last().unwrap();
        assert_eq!(turn.content(), "Oats and fruit");
        assert_eq!(turn.role(), Role::Assistant);
        assert!(!turn.is_in_progress());
        assert!(!turn.is_error());
        assert!(log.in_progress().is_none());
    }

    #[test]
    fn fail_replaces_content_and_flags_error() {
        let mut log = ConversationLog::new();
        log.push_user("hi").unwrap();
        log.begin_assistant().unwrap();
        log.stream_content("half an ans").unwrap();

        log.fail("Session expired").unwrap();

        let turn = log.last().unwrap();
        assert_eq!(turn.content(), "Session expired");
        assert!(turn.is_error());
        assert!(!turn.is_in_progress());
    }

    #[test]
    fn terminal_turns_are_never_revisited() {
        let mut log = ConversationLog::new();
        log.push_user("hi").unwrap();
        log.begin_assistant().unwrap();
        log.complete().unwrap();

        assert_eq!(log.stream_content("late"), Err(LogError::NoTurnInProgress));
        assert_eq!(log.fail("late"), Err(LogError::NoTurnInProgress));
        assert_eq!(log.complete(), Err(LogError::NoTurnInProgress));
        assert_eq!(log.last().unwrap().content(), "");
        assert_eq!(log.last().unwrap().state(), TurnState::Completed);
    }

    #[test]
    fn nothing_is_appended_behind_an_open_turn() {
        let mut log = ConversationLog::new();
        log.push_user("hi").unwrap();
        log.begin_assistant().unwrap();

        assert_eq!(log.push_user("again"), Err(LogError::TurnInProgress));
        assert_eq!(log.begin_assistant(), Err(LogError::TurnInProgress));
        assert_eq!(log.len(), 2);
        assert_single_trailing_in_progress(&log);
    }

    #[test]
    fn user_turns_cannot_be_edited() {
        let mut log = ConversationLog::new();
        log.push_user("hi").unwrap();
        assert_eq!(log.stream_content("edited"), Err(LogError::NoTurnInProgress));
        assert_eq!(log.last().unwrap().content(), "hi");
    }

    #[test]
    fn clear_empties_the_log() {
        let mut log = ConversationLog::new();
        log.push_user("hi").unwrap();
        log.begin_assistant().unwrap();
        log.clear();
        assert!(log.is_empty());
        assert!(log.in_progress().is_none());
        log.push_user("fresh start").unwrap();
        assert_eq!(log.len(), 1);
    }
}
