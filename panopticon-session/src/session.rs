//! Sessions and the command surface.

use std::fs;
use std::path::{Path, PathBuf};

use panopticon_analysis::Program;
use panopticon_arch::{amd64, avr};
use panopticon_region::{Blob, Region};
use panopticon_types::Ref;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{pe, Database, SessionError};

/// An invertible user action.
///
/// `previous` fields are filled in on execution with the state the command
/// replaced, which makes the executed command its own undo recipe.
#[derive(Debug)]
enum Command {
    Comment {
        at: Ref,
        text: Option<String>,
        previous: Option<String>,
    },
    Rename {
        function: Uuid,
        name: String,
        previous: String,
    },
    SetValue {
        function: Uuid,
        variable: String,
        value: Option<String>,
        previous: Option<String>,
    },
}

/// One open analysis session.
///
/// Mutating commands go through [`Session::comment_on`],
/// [`Session::rename_function`] and [`Session::set_value_for`], which
/// record their inverse on the undo stack; a fresh command clears the redo
/// stack.
#[derive(Debug)]
pub struct Session {
    /// The session contents.
    pub database: Database,
    path: Option<PathBuf>,
    undo_stack: Vec<Command>,
    redo_stack: Vec<Command>,
}

impl Session {
    fn with_database(database: Database) -> Self {
        Self {
            database,
            path: None,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    /// Reopen a saved session.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let file = fs::File::open(path.as_ref()).map_err(panopticon_region::RegionError::from)?;
        let database = serde_json::from_reader(file)?;
        let mut session = Self::with_database(database);

        session.path = Some(path.as_ref().to_path_buf());
        Ok(session)
    }

    /// Session over a raw image without disassembling anything.
    pub fn raw(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let title = title_of(path.as_ref());
        let region = Region::map_file("base", path)?;
        let mut database = Database::new(title);

        database.data.insert_vertex(region);
        Ok(Self::with_database(database))
    }

    /// Session over an AVR flash image, disassembled from offset zero.
    pub fn open_avr(path: impl AsRef<Path>, state: &avr::AvrState) -> Result<Self, SessionError> {
        let mut session = Self::raw(path)?;
        let root = session
            .database
            .find_region("base")
            .ok_or(SessionError::BadImage("empty session"))?;
        let slab = session
            .database
            .data
            .vertex_label(root)
            .expect("inserted above")
            .read();

        if let Some(program) = avr::disassemble(state, None, &slab, &Ref::new("base", 0))? {
            info!(procedures = program.procedures().count(), "AVR image disassembled");
            session.database.programs.push(program);
        }

        Ok(session)
    }

    /// Session over a PE binary, disassembled from its entry point.
    pub fn open_pe(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let title = title_of(path.as_ref());
        let blob = Blob::map_file(path)?;
        let image = pe::load(&blob)?;
        let mut database = Database::new(title);
        let entry = image.image_base + image.entry;
        let slab = image.region.read();

        database.data.insert_vertex(image.region);

        let program: Option<Program> = match image.machine {
            pe::MACHINE_AMD64 => {
                amd64::disassemble(&amd64::Amd64State::long(), None, &slab, &Ref::new("base", entry))?
            }
            pe::MACHINE_I386 => amd64::disassemble(
                &amd64::Amd64State::protected(),
                None,
                &slab,
                &Ref::new("base", entry),
            )?,
            other => return Err(SessionError::UnsupportedArchitecture(other)),
        };

        if let Some(program) = program {
            info!(procedures = program.procedures().count(), "PE image disassembled");
            database.programs.push(program);
        }

        Ok(Self::with_database(database))
    }

    /// Open any supported program image, sniffing the container format.
    pub fn open_program(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let blob = Blob::map_file(path.as_ref())?;

        if blob.data().starts_with(b"MZ") {
            debug!("container looks like PE");
            Self::open_pe(path)
        } else {
            debug!("treating image as raw AVR flash");
            Self::open_avr(path, &avr::AvrState::mega88())
        }
    }

    /// Write the session to `path` and remember it for later saves.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let file = fs::File::create(path.as_ref()).map_err(panopticon_region::RegionError::from)?;

        serde_json::to_writer(file, &self.database)?;
        self.path = Some(path.as_ref().to_path_buf());
        Ok(())
    }

    /// Path of the last save or open, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Attach `text` as the comment at `at`; empty text removes it.
    pub fn comment_on(&mut self, at: Ref, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        let text = if text.is_empty() { None } else { Some(text) };

        self.apply(Command::Comment {
            at,
            text,
            previous: None,
        });
        Ok(())
    }

    /// Rename the function with identity `function`.
    pub fn rename_function(
        &mut self,
        function: Uuid,
        name: impl Into<String>,
    ) -> Result<(), SessionError> {
        if self.find_function(&function).is_none() {
            return Err(SessionError::UnknownFunction(function));
        }

        self.apply(Command::Rename {
            function,
            name: name.into(),
            previous: String::new(),
        });
        Ok(())
    }

    /// Override the displayed value of `variable` inside a function; empty
    /// values remove the override.
    pub fn set_value_for(
        &mut self,
        function: Uuid,
        variable: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), SessionError> {
        if self.find_function(&function).is_none() {
            return Err(SessionError::UnknownFunction(function));
        }

        let value = value.into();
        let value = if value.is_empty() { None } else { Some(value) };

        self.apply(Command::SetValue {
            function,
            variable: variable.into(),
            value,
            previous: None,
        });
        Ok(())
    }

    /// Take back the most recent command.
    pub fn undo(&mut self) -> Result<(), SessionError> {
        let command = self.undo_stack.pop().ok_or(SessionError::NothingToUndo)?;
        let inverse = self.run(command.inverted());

        self.redo_stack.push(inverse.inverted());
        Ok(())
    }

    /// Re-apply the most recently undone command.
    pub fn redo(&mut self) -> Result<(), SessionError> {
        let command = self.redo_stack.pop().ok_or(SessionError::NothingToRedo)?;
        let applied = self.run(command);

        self.undo_stack.push(applied);
        Ok(())
    }

    /// True if a command can be undone.
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// True if a command can be redone.
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    fn find_function(&self, function: &Uuid) -> Option<&str> {
        self.database.programs.iter().find_map(|program| {
            program
                .find_procedure(function)
                .and_then(|vx| program.calls().vertex_label(vx))
                .map(|proc| proc.name.as_str())
        })
    }

    fn apply(&mut self, command: Command) {
        let applied = self.run(command);

        self.undo_stack.push(applied);
        self.redo_stack.clear();
    }

    /// Execute a command against the database and return it with its
    /// observed previous state, ready for the undo stack.
    fn run(&mut self, command: Command) -> Command {
        match command {
            Command::Comment { at, text, .. } => {
                let previous = match &text {
                    Some(text) => self.database.comments.insert(at.clone(), text.clone()),
                    None => self.database.comments.remove(&at),
                };

                Command::Comment { at, text, previous }
            }
            Command::Rename { function, name, .. } => {
                let mut previous = String::new();

                for program in &mut self.database.programs {
                    if let Some(vx) = program.find_procedure(&function) {
                        if let Some(proc) = program.procedure_mut(vx) {
                            previous = std::mem::replace(&mut proc.name, name.clone());
                        }
                    }
                }

                Command::Rename {
                    function,
                    name,
                    previous,
                }
            }
            Command::SetValue {
                function,
                variable,
                value,
                ..
            } => {
                let slot = self.database.values.entry(function).or_default();
                let previous = match &value {
                    Some(value) => slot.insert(variable.clone(), value.clone()),
                    None => slot.remove(&variable),
                };

                Command::SetValue {
                    function,
                    variable,
                    value,
                    previous,
                }
            }
        }
    }
}

impl Command {
    /// The command that takes this one back.
    fn inverted(self) -> Command {
        match self {
            Command::Comment { at, text, previous } => Command::Comment {
                at,
                text: previous,
                previous: text,
            },
            Command::Rename {
                function,
                name,
                previous,
            } => Command::Rename {
                function,
                name: previous,
                previous: name,
            },
            Command::SetValue {
                function,
                variable,
                value,
                previous,
            } => Command::SetValue {
                function,
                variable,
                value: previous,
                previous: value,
            },
        }
    }
}

fn title_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "(unnamed)".to_string())
}
