//! In-memory command catalog: profiles, sections and command templates

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A labeled command template. `text` is sent verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandItem {
    /// Button label
    pub label: String,
    /// Payload sent on dispatch
    pub text: String,
}

impl CommandItem {
    /// Create a command
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// Ordered section map; insertion order is display and dispatch order
pub type Sections = IndexMap<String, Vec<CommandItem>>;

/// Catalog editing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Name was empty after trimming
    #[error("Name must not be empty")]
    EmptyName,

    /// Section name already used in this profile
    #[error("Section already exists: {0}")]
    SectionExists(String),

    /// Section not present in this profile
    #[error("Section not found: {0}")]
    SectionNotFound(String),

    /// Command index outside the section
    #[error("Section '{section}' has no command at position {index}")]
    CommandOutOfRange {
        /// Section name
        section: String,
        /// Requested index
        index: usize,
    },
}

/// A named collection of command sections.
///
/// Values handed out by the store are detached copies; edits take effect
/// only when the profile is saved back.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Profile name, also the persistence key
    pub name: String,
    /// Sections in order
    #[serde(default)]
    pub sections: Sections,
}

fn clean_name(name: &str) -> Result<String, CatalogError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CatalogError::EmptyName);
    }
    Ok(name.to_string())
}

impl Profile {
    /// Create an empty profile
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sections: Sections::new(),
        }
    }

    /// Builder-style section append, mainly for seeding
    #[must_use]
    pub fn with_section(mut self, name: &str, commands: Vec<CommandItem>) -> Self {
        self.sections.insert(name.to_string(), commands);
        self
    }

    /// Section names in order
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Commands of a section
    pub fn commands(&self, section: &str) -> Option<&[CommandItem]> {
        self.sections.get(section).map(Vec::as_slice)
    }

    /// First command in `section` with the given label
    pub fn find_command(&self, section: &str, label: &str) -> Option<&CommandItem> {
        self.commands(section)?.iter().find(|c| c.label == label)
    }

    /// Total number of commands across sections
    pub fn command_count(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }

    /// Append an empty section
    pub fn add_section(&mut self, name: &str) -> Result<(), CatalogError> {
        let name = clean_name(name)?;
        if self.sections.contains_key(&name) {
            return Err(CatalogError::SectionExists(name));
        }
        self.sections.insert(name, Vec::new());
        Ok(())
    }

    /// Rename a section in place, keeping its position
    pub fn rename_section(&mut self, old: &str, new: &str) -> Result<(), CatalogError> {
        let new = clean_name(new)?;
        let index = self
            .sections
            .get_index_of(old)
            .ok_or_else(|| CatalogError::SectionNotFound(old.to_string()))?;
        if new == old {
            return Ok(());
        }
        if self.sections.contains_key(&new) {
            return Err(CatalogError::SectionExists(new));
        }
        let (_, commands) = self
            .sections
            .shift_remove_index(index)
            .ok_or_else(|| CatalogError::SectionNotFound(old.to_string()))?;
        self.sections.shift_insert(index, new, commands);
        Ok(())
    }

    /// Remove a section and its commands
    pub fn delete_section(&mut self, name: &str) -> Result<Vec<CommandItem>, CatalogError> {
        self.sections
            .shift_remove(name)
            .ok_or_else(|| CatalogError::SectionNotFound(name.to_string()))
    }

    /// Move a section to a new position
    pub fn move_section(&mut self, name: &str, to: usize) -> Result<(), CatalogError> {
        let from = self
            .sections
            .get_index_of(name)
            .ok_or_else(|| CatalogError::SectionNotFound(name.to_string()))?;
        let to = to.min(self.sections.len() - 1);
        self.sections.move_index(from, to);
        Ok(())
    }

    /// Append a command; the section is created when missing
    pub fn add_command(&mut self, section: &str, item: CommandItem) -> Result<(), CatalogError> {
        let label = clean_name(&item.label)?;
        let item = CommandItem {
            label,
            text: item.text,
        };
        // Stored names are matched as-is; only new sections get a cleaned name
        if let Some(commands) = self.sections.get_mut(section) {
            commands.push(item);
            return Ok(());
        }
        self.sections.entry(clean_name(section)?).or_default().push(item);
        Ok(())
    }

    /// Replace the command at `index`
    pub fn edit_command(
        &mut self,
        section: &str,
        index: usize,
        item: CommandItem,
    ) -> Result<(), CatalogError> {
        let label = clean_name(&item.label)?;
        let slot = self.command_slot(section, index)?;
        *slot = CommandItem {
            label,
            text: item.text,
        };
        Ok(())
    }

    /// Remove the command at `index`
    pub fn delete_command(&mut self, section: &str, index: usize) -> Result<CommandItem, CatalogError> {
        self.command_slot(section, index)?;
        let commands = self
            .sections
            .get_mut(section)
            .ok_or_else(|| CatalogError::SectionNotFound(section.to_string()))?;
        Ok(commands.remove(index))
    }

    /// Move a command within its section
    pub fn move_command(&mut self, section: &str, from: usize, to: usize) -> Result<(), CatalogError> {
        let item = self.delete_command(section, from)?;
        let commands = self
            .sections
            .get_mut(section)
            .ok_or_else(|| CatalogError::SectionNotFound(section.to_string()))?;
        let to = to.min(commands.len());
        commands.insert(to, item);
        Ok(())
    }

    fn command_slot(&mut self, section: &str, index: usize) -> Result<&mut CommandItem, CatalogError> {
        self.sections
            .get_mut(section)
            .ok_or_else(|| CatalogError::SectionNotFound(section.to_string()))?
            .get_mut(index)
            .ok_or_else(|| CatalogError::CommandOutOfRange {
                section: section.to_string(),
                index,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Profile {
        Profile::new("Default")
            .with_section("Quick", vec![CommandItem::new("AT", "AT"), CommandItem::new("Reset", "reset")])
            .with_section("Net", vec![])
            .with_section("Debug", vec![CommandItem::new("Dump", "dump all")])
    }

    #[test]
    fn test_add_section_rejects_duplicates() {
        let mut p = sample();
        assert_eq!(p.add_section("Quick"), Err(CatalogError::SectionExists("Quick".into())));
        assert_eq!(p.add_section("   "), Err(CatalogError::EmptyName));
        p.add_section(" Extra ").unwrap();
        assert_eq!(p.section_names().last(), Some("Extra"));
    }

    #[test]
    fn test_rename_section_keeps_position() {
        let mut p = sample();
        p.rename_section("Net", "Network").unwrap();
        let names: Vec<_> = p.section_names().collect();
        assert_eq!(names, ["Quick", "Network", "Debug"]);
        assert_eq!(
            p.rename_section("Quick", "Debug"),
            Err(CatalogError::SectionExists("Debug".into()))
        );
        assert_eq!(
            p.rename_section("Missing", "X"),
            Err(CatalogError::SectionNotFound("Missing".into()))
        );
    }

    #[test]
    fn test_move_section() {
        let mut p = sample();
        p.move_section("Debug", 0).unwrap();
        let names: Vec<_> = p.section_names().collect();
        assert_eq!(names, ["Debug", "Quick", "Net"]);
        p.move_section("Debug", 99).unwrap();
        assert_eq!(p.section_names().last(), Some("Debug"));
    }

    #[test]
    fn test_delete_section() {
        let mut p = sample();
        let removed = p.delete_section("Quick").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(p.commands("Quick").is_none());
        assert!(p.delete_section("Quick").is_err());
    }

    #[test]
    fn test_command_editing() {
        let mut p = sample();
        p.add_command("New", CommandItem::new("Ping", "ping")).unwrap();
        assert_eq!(p.commands("New").unwrap().len(), 1);

        p.edit_command("Quick", 1, CommandItem::new("Reboot", "reboot")).unwrap();
        assert_eq!(p.commands("Quick").unwrap()[1], CommandItem::new("Reboot", "reboot"));

        assert_eq!(
            p.edit_command("Quick", 5, CommandItem::new("x", "x")),
            Err(CatalogError::CommandOutOfRange {
                section: "Quick".into(),
                index: 5
            })
        );

        p.move_command("Quick", 1, 0).unwrap();
        assert_eq!(p.commands("Quick").unwrap()[0].label, "Reboot");

        let removed = p.delete_command("Quick", 0).unwrap();
        assert_eq!(removed.label, "Reboot");
        assert_eq!(p.command_count(), 3);
    }

    #[test]
    fn test_find_command() {
        let p = sample();
        assert_eq!(p.find_command("Quick", "Reset").unwrap().text, "reset");
        assert!(p.find_command("Quick", "Nope").is_none());
    }

    #[test]
    fn test_add_command_to_untrimmed_stored_section() {
        let mut p = Profile::new("Legacy").with_section(" Quick ", vec![]);
        p.add_command(" Quick ", CommandItem::new("AT", "AT")).unwrap();
        assert_eq!(p.sections.len(), 1);
        assert_eq!(p.commands(" Quick ").unwrap().len(), 1);

        p.add_command("  Fresh  ", CommandItem::new("Ver", "ver")).unwrap();
        assert_eq!(p.section_names().collect::<Vec<_>>(), [" Quick ", "Fresh"]);
    }
}
