// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! The interaction capability the key management operations call out
//! to: confirmations, notifications and PIN entry.

/// Callbacks into the user facing layer
///
/// Implementations decide how prompts are shown, the operations in this
/// crate only rely on the answers.
pub trait UserInteraction {
    /// Asks the user to confirm a request, like inserting a card.
    /// Returns false if the user cancelled.
    fn confirm(&mut self, text: &str) -> bool;

    /// Shows a non fatal message
    fn notify(&mut self, text: &str);

    /// Asks a yes/no question
    fn yes_no(&mut self, text: &str) -> bool;

    /// Asks for a PIN, returns None if the user aborted PIN entry
    fn prompt_pin(&mut self, label: &str) -> Option<Vec<u8>>;
}
