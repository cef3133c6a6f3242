//! The world's player file, `<world>/player.json`.
//!
//! Only the inventories matter to storage; any other player state is kept
//! as opaque JSON so that rewriting the file never loses it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::content::ItemId;
use crate::error::Result;

use super::inventories::ItemStack;

/// Player file inside the world directory.
pub const PLAYER_FILE: &str = "player.json";

/// One player's saved state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerData {
    /// Player name.
    pub name: String,
    /// Carried items.
    #[serde(default)]
    pub inventory: Vec<ItemStack>,
    /// Keys this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Contents of `player.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerFile {
    /// Saved players.
    #[serde(default)]
    pub players: Vec<PlayerData>,
    /// World-level keys such as the clock or spawn point.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PlayerFile {
    /// Location of the player file inside `world_dir`.
    pub fn path(world_dir: &Path) -> PathBuf {
        world_dir.join(PLAYER_FILE)
    }

    /// Loads the player file, `None` if the world has never saved one.
    pub fn load(world_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(world_dir);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Writes the file as pretty-printed JSON.
    pub fn save(&self, world_dir: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(Self::path(world_dir), text)?;
        Ok(())
    }

    /// Rewrites every item id through `remap`.
    pub fn remap_items(&mut self, remap: impl Fn(ItemId) -> ItemId) {
        for stack in self.players.iter_mut().flat_map(|p| p.inventory.iter_mut()) {
            stack.item = remap(stack.item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_survive_a_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            PlayerFile::path(dir.path()),
            r#"{"players":[{"name":"alex","inventory":[{"item":1,"count":4}],"position":[1,2,3]}]}"#,
        )
        .unwrap();

        let mut file = PlayerFile::load(dir.path()).unwrap().unwrap();
        file.remap_items(|item| item + 1);
        file.save(dir.path()).unwrap();

        let reloaded = PlayerFile::load(dir.path()).unwrap().unwrap();
        let player = &reloaded.players[0];
        assert_eq!(player.inventory, vec![ItemStack::new(2, 4)]);
        assert_eq!(player.extra["position"], serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn top_level_keys_survive_a_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            PlayerFile::path(dir.path()),
            r#"{"players":[],"time":1234,"spawn":[0,64,0]}"#,
        )
        .unwrap();

        let file = PlayerFile::load(dir.path()).unwrap().unwrap();
        file.save(dir.path()).unwrap();

        let text = fs::read_to_string(PlayerFile::path(dir.path())).unwrap();
        let written: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(written["time"], 1234);
        assert_eq!(written["spawn"], serde_json::json!([0, 64, 0]));
        assert_eq!(written["players"], serde_json::json!([]));
    }

    #[test]
    fn absent_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PlayerFile::load(dir.path()).unwrap().is_none());
    }
}
