#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub fn gzip(xml: &str) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(xml.as_bytes()).unwrap();
    enc.finish().unwrap()
}

/// A minimal Live 11 set with one MIDI track carrying `plugins` and
/// `devices`.
pub fn live_set(tempo: f64, plugins: &[&str], devices: &[&str]) -> String {
    let mut chain = String::new();
    for d in devices {
        chain.push_str(&format!("<{} Id=\"0\"/>", d));
    }
    for p in plugins {
        chain.push_str(&format!(
            "<PluginDevice Id=\"0\"><PluginDesc><VstPluginInfo Id=\"0\"><PlugName Value=\"{}\"/></VstPluginInfo></PluginDesc></PluginDevice>",
            p
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Ableton MajorVersion="5" MinorVersion="11.0_433" Creator="Ableton Live 11.3">
  <LiveSet>
    <Tracks>
      <AudioTrack Id="1"/>
      <MidiTrack Id="2"><DeviceChain><DeviceChain><Devices>{}</Devices></DeviceChain></DeviceChain></MidiTrack>
    </Tracks>
    <MasterTrack><DeviceChain><Mixer><Tempo><Manual Value="{}"/></Tempo></Mixer></DeviceChain></MasterTrack>
  </LiveSet>
</Ableton>"#,
        chain, tempo
    )
}

pub fn write_set(path: &Path, xml: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, gzip(xml)).unwrap();
}

/// A temp directory holding `music/` (the single location) and a config
/// file pointing a fresh database into `data/`.
pub struct TestEnv {
    pub tmp: TempDir,
    pub music: PathBuf,
    pub config_path: PathBuf,
}

impl TestEnv {
    pub fn new(extra: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().canonicalize().unwrap();
        let music = base.join("music");
        fs::create_dir_all(&music).unwrap();
        fs::create_dir_all(base.join("config")).unwrap();

        let content = format!(
            r#"[db]
path = "{}/data/lsi.sqlite"

[[locations]]
name = "music"
root = "{}"

[server]
bind = "127.0.0.1:0"

[logging]
filter = "warn"
{}
"#,
            base.display(),
            music.display(),
            extra
        );
        let config_path = base.join("config").join("lsi.toml");
        fs::write(&config_path, content).unwrap();

        Self {
            tmp,
            music,
            config_path,
        }
    }

    pub fn config(&self) -> liveset_index::config::Config {
        liveset_index::config::load_config(&self.config_path).unwrap()
    }
}
