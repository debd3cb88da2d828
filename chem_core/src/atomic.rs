//! Crash-safe persistence of controller runtime state.
//!
//! The state file is JSON written through a temp file and rename, so a
//! power cut leaves either the old file or the new one.

use std::collections::BTreeMap;
use std::{fs, io::Write, path::Path};

use chrono::{DateTime, Local};
use eyre::WrapErr;
use serde::{Deserialize, Serialize};

use crate::config::ChemicalKind;
use crate::error::Result;
use crate::state::PersistedChemical;

pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("new");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(tmp, path)
}

/// Everything needed to resume controllers after a restart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SavedState {
    pub saved_at: Option<DateTime<Local>>,
    pub controllers: BTreeMap<u8, Vec<(ChemicalKind, PersistedChemical)>>,
}

impl SavedState {
    pub fn new(controllers: BTreeMap<u8, Vec<(ChemicalKind, PersistedChemical)>>) -> Self {
        Self {
            saved_at: Some(Local::now()),
            controllers,
        }
    }

    /// Take the saved chemicals for one controller, if any.
    pub fn take(&mut self, id: u8) -> Vec<(ChemicalKind, PersistedChemical)> {
        self.controllers.remove(&id).unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).wrap_err("encoding state")?;
        write_atomic(path, &bytes).wrap_err_with(|| format!("writing state file {}", path.display()))
    }

    /// A missing file is an empty state; a corrupt one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(eyre::Report::new(e).wrap_err(format!("reading state file {}", path.display()))),
        };
        serde_json::from_str(&text).wrap_err_with(|| format!("parsing state file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DosingStatus;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("chem_core_atomic_{}_{name}", std::process::id()));
        let _ = fs::create_dir_all(&dir);
        dir.join("state.json")
    }

    #[test]
    fn missing_file_is_empty_state() {
        let s = SavedState::load(&tmp_path("missing")).unwrap();
        assert!(s.controllers.is_empty());
    }

    #[test]
    fn state_survives_a_save() {
        let path = tmp_path("save");
        let mut ctls = BTreeMap::new();
        ctls.insert(
            3,
            vec![(
                ChemicalKind::Ph,
                PersistedChemical {
                    status: DosingStatus::Dosing,
                    volume_dosed: 60.0,
                    dosing_volume_remaining: 40.0,
                    ..Default::default()
                },
            )],
        );
        SavedState::new(ctls).save(&path).unwrap();
        assert!(!path.with_extension("new").exists());

        let mut back = SavedState::load(&path).unwrap();
        let chems = back.take(3);
        assert_eq!(chems.len(), 1);
        assert_eq!(chems[0].1.status, DosingStatus::Dosing);
        assert_eq!(chems[0].1.dosing_volume_remaining, 40.0);
        assert!(back.take(3).is_empty());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let path = tmp_path("corrupt");
        fs::write(&path, b"{not json").unwrap();
        assert!(SavedState::load(&path).is_err());
    }
}
