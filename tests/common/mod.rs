//! Shared fixtures for the integration suite: a scripted fake steam
//! client, a stub metadata fetcher, and config builders.
#![cfg(unix)]
#![allow(dead_code)]

use async_trait::async_trait;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use workshop_dl::{Config, ItemId, MetadataFetcher, WorkshopItem};

/// Canonical item used by the fake client's success path.
pub const ITEM_ID: u64 = 123;
/// Submission URL for [`ITEM_ID`].
pub const ITEM_URL: &str = "https://steamcommunity.com/sharedfiles/filedetails/?id=123";

/// Stub metadata fetcher returning canned snapshots.
pub struct StubFetcher {
    pub app_id: u32,
    pub valid: bool,
}

#[async_trait]
impl MetadataFetcher for StubFetcher {
    async fn fetch(&self, item_id: ItemId) -> workshop_dl::Result<WorkshopItem> {
        Ok(WorkshopItem {
            item_id,
            app_id: self.app_id,
            title: format!("integration item {item_id}"),
            author: Some("integration".into()),
            preview_url: None,
            declared_size: Some(4096),
            valid: self.valid,
        })
    }
}

/// Behaviors for the scripted fake steam client.
pub enum FakeBehavior {
    /// Success markers + canonical content layout for [`ITEM_ID`]
    Success,
    /// Sleep until killed
    Hang,
    /// Second-factor prompt on every invocation
    SecondFactor,
    /// Transient failure on the first invocation, success afterwards
    FlakyOnce,
}

/// Write the fake client script into `dir` and return its path.
pub fn write_fake_steamcmd(dir: &TempDir, behavior: FakeBehavior) -> PathBuf {
    let path = dir.path().join("steamcmd");
    let counter = dir.path().join("invocations");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(
        file,
        r#"n=$(cat "{counter}" 2>/dev/null || echo 0); n=$((n+1)); echo "$n" > "{counter}"
prev=""
for arg in "$@"; do
  if [ "$prev" = "+force_install_dir" ]; then install_dir="$arg"; fi
  prev="$arg"
done"#,
        counter = counter.display()
    )
    .unwrap();

    let success_block = r#"echo "Loading Steam API...OK"
echo "Logged in OK"
echo "Downloading item 123 ..."
echo "downloading update (1024 of 4096 KB)..."
echo "downloading update (4096 of 4096 KB)..."
if [ -n "$install_dir" ]; then
  mkdir -p "$install_dir/steamapps/workshop/content/480/123"
  head -c 8192 /dev/urandom > "$install_dir/steamapps/workshop/content/480/123/mod.pak"
  echo "name=integration" > "$install_dir/steamapps/workshop/content/480/123/mod.info"
fi
echo "Success. Downloaded item 123."
exit 0"#;

    match behavior {
        FakeBehavior::Success => writeln!(file, "{success_block}").unwrap(),
        FakeBehavior::Hang => writeln!(file, "echo 'Logged in OK'\nsleep 600").unwrap(),
        FakeBehavior::SecondFactor => {
            writeln!(file, "echo 'Steam Guard code required for account'\nexit 5").unwrap()
        }
        FakeBehavior::FlakyOnce => writeln!(
            file,
            r#"if [ "$n" -le 1 ]; then
  echo "ERROR! Download item 123 failed (Failure)."
  exit 1
fi
{success_block}"#
        )
        .unwrap(),
    }

    let mut perms = file.metadata().unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Config wired to the temp dir and the fake client, with fast retries.
pub fn test_config(dir: &TempDir, binary: PathBuf) -> Config {
    let mut config = Config::default();
    config.download.download_root = dir.path().join("downloads");
    config.steam.steamcmd_path = Some(binary);
    config.steam.fetch_timeout = Duration::from_secs(30);
    config.steam.verify_timeout = Duration::from_secs(10);
    config.processing.retry.base_delay = Duration::from_millis(20);
    config.processing.retry.jitter = false;
    config.processing.archive.min_size = 512;
    config.server.api.swagger_ui = false;
    config
}
