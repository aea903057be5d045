//! Common test utilities for personality integration tests
//!
//! - Header-definition fixtures written to a temporary directory
//! - Settings suitable for tests (ephemeral port, short intervals)
//! - A personality wired to an in-memory orchestrator

#![allow(dead_code)] // Utilities may not all be used by every test binary

use cam_personality::config::Settings;
use cam_personality::orchestrator::LocalOrchestrator;
use cam_personality::personality::Personality;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TELESCOPE_DEFS: &str = "\
# alias            key       type    default        ! comment
NA                 TELESCOP  string  Subaru         ! Telescope/System which Inst. is attached
FITS.SBR.RA        RA        string  00:00:00.000   ! HH:MM:SS.SSS RA pointing
FITS.SBR.DEC       DEC       string  +00:00:00.00   ! +/-DD:MM:SS.SS DEC pointing
FITS.SBR.EQUINOX   EQUINOX   float   2000.0         ! Standard FK5 (years)
FITS.SBR.AIRMASS   AIRMASS   float   1.0            ! Average airmass during exposure
FITS.SBR.FOCUSPOS  FOC-POS   int     0              ! Focus position index
";

pub const AUXILIARY_DEFS: &str = "\
# alias            key       type    default        ! comment
AON.IMR.PAD        D_IMRPAD  float   0.0            ! Image rotator position angle offset (deg)
AON.LOOP.HOD       D_LOOP    string  OFF            ! AO loop state
NA                 D_AOSYS   string  AO188          ! Adaptive optics system
";

/// Definition files in a temporary directory that lives as long as the fixture.
pub struct DefinitionFiles {
    pub dir: TempDir,
    pub telescope: PathBuf,
    pub auxiliary: PathBuf,
}

pub fn write_definitions() -> DefinitionFiles {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let telescope = dir.path().join("header_telescope.txt");
    let auxiliary = dir.path().join("header_ao188_lgs.txt");
    std::fs::write(&telescope, TELESCOPE_DEFS).expect("Failed to write telescope defs");
    std::fs::write(&auxiliary, AUXILIARY_DEFS).expect("Failed to write auxiliary defs");
    DefinitionFiles {
        dir,
        telescope,
        auxiliary,
    }
}

/// Settings pointing at `files`, bound to an ephemeral loopback port.
pub fn test_settings(files: &DefinitionFiles) -> Settings {
    let mut settings = Settings::default();
    settings.header.telescope_definitions = files.telescope.clone();
    settings.header.auxiliary_definitions = files.auxiliary.clone();
    settings.query_server.bind_address = "127.0.0.1".to_string();
    settings.query_server.port = 0;
    settings.query_server.accept_timeout = Duration::from_millis(50);
    settings.status.interval = Duration::from_millis(50);
    settings.status.header_refresh_interval = Duration::from_millis(50);
    settings.application.shutdown_timeout = Duration::from_secs(2);
    settings
}

/// Orchestrator reporting a fixed pointing and AO state.
pub fn pointed_orchestrator() -> Arc<LocalOrchestrator> {
    let ocs = Arc::new(LocalOrchestrator::new("CRS"));
    ocs.set_live("FITS.SBR.RA", "10:00:00");
    ocs.set_live("FITS.SBR.DEC", "-20:30:00");
    ocs.set_live("FITS.SBR.AIRMASS", 1.25);
    ocs.set_live("AON.LOOP.HOD", "ON");
    ocs.set_live("STATS.RA", "10:00:00.000");
    ocs.set_live("TSCV.FOCUSINFO", 2i64);
    ocs
}

pub struct TestPersonality {
    pub personality: Personality,
    pub ocs: Arc<LocalOrchestrator>,
    pub files: DefinitionFiles,
}

pub fn create_personality() -> TestPersonality {
    create_personality_with(|_| {})
}

/// Like [`create_personality`], with `configure` applied to the test settings.
pub fn create_personality_with(configure: impl FnOnce(&mut Settings)) -> TestPersonality {
    let files = write_definitions();
    let ocs = pointed_orchestrator();
    let mut settings = test_settings(&files);
    configure(&mut settings);
    let personality =
        Personality::new(settings, ocs.clone()).expect("Failed to create personality");
    TestPersonality {
        personality,
        ocs,
        files,
    }
}
