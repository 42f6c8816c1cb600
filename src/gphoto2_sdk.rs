//! Production SDK backend over libgphoto2.
//!
//! Every call blocks on the gphoto2 task and therefore stays on the
//! dispatcher thread that owns this backend. EOS bodies are driven through
//! the `eosremoterelease` radio (Immediate / Release Full maps to shutter
//! press / release), the `shutterspeed` and `iso` radios for the property
//! scale, and the `uilock` toggle where the body offers one.

use crate::sdk::{CameraInfo, CameraProp, CameraSdk, CameraSession, SdkError};
use crate::tables;
use gphoto2::camera::CameraEvent;
use gphoto2::list::CameraDescriptor;
use gphoto2::widget::{RadioWidget, ToggleWidget};
use gphoto2::{Camera, Context};
use std::time::Duration;

const PRESS_CHOICE: &str = "Immediate";
const RELEASE_CHOICE: &str = "Release Full";

/// libgphoto2 reports a USB unplug under several different messages,
/// including the catch-all 0x2002 "unspecified error".
const GONE_MARKERS: &[&str] = &[
    "no device",
    "not found",
    "disconnected",
    "i/o error",
    "unspecified",
    "general error",
    "usb port",
];

fn sdk_err(error: gphoto2::Error) -> SdkError {
    let text = error.to_string();
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("busy") {
        SdkError::Busy
    } else if GONE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        SdkError::Gone(text)
    } else {
        SdkError::Session(text)
    }
}

#[derive(Default)]
pub struct Gphoto2Sdk {
    context: Option<Context>,
    detected: Vec<CameraDescriptor>,
}

impl Gphoto2Sdk {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CameraSdk for Gphoto2Sdk {
    type Session = Gphoto2Session;

    fn load(&mut self) -> Result<(), SdkError> {
        if self.context.is_none() {
            self.context = Some(Context::new().map_err(sdk_err)?);
        }
        Ok(())
    }

    fn unload(&mut self) {
        self.detected.clear();
        self.context = None;
    }

    fn detect(&mut self) -> Result<Vec<CameraInfo>, SdkError> {
        let context = self.context.as_ref().ok_or(SdkError::NotReady)?;
        self.detected = context.list_cameras().wait().map_err(sdk_err)?.collect();
        Ok(self
            .detected
            .iter()
            .map(|descriptor| CameraInfo {
                model: descriptor.model.clone(),
                port: descriptor.port.clone(),
            })
            .collect())
    }

    fn open(&mut self, index: usize) -> Result<Self::Session, SdkError> {
        let context = self.context.as_ref().ok_or(SdkError::NotReady)?;
        let descriptor = self.detected.get(index).ok_or(SdkError::NotReady)?;
        let camera = context.get_camera(descriptor).wait().map_err(sdk_err)?;
        Gphoto2Session::new(camera)
    }
}

pub struct Gphoto2Session {
    camera: Camera,
    shutter: RadioWidget,
    iso: RadioWidget,
    remote_release: RadioWidget,
    ui_lock: Option<ToggleWidget>,
    /// Parameter code of each usable `shutterspeed` choice, resolved while
    /// enumerating the advertised set.
    shutter_choices: Vec<(u32, String)>,
    iso_choices: Vec<(u32, String)>,
    bulb_choice: Option<String>,
    iso_auto_choice: Option<String>,
}

impl Gphoto2Session {
    fn new(camera: Camera) -> Result<Self, SdkError> {
        let shutter = camera
            .config_key::<RadioWidget>("shutterspeed")
            .wait()
            .map_err(sdk_err)?;
        let iso = camera.config_key::<RadioWidget>("iso").wait().map_err(sdk_err)?;
        let remote_release = camera
            .config_key::<RadioWidget>("eosremoterelease")
            .wait()
            .map_err(sdk_err)?;
        // not all bodies expose one
        let ui_lock = camera.config_key::<ToggleWidget>("uilock").wait().ok();
        if ui_lock.is_none() {
            tracing::debug!("body has no uilock config");
        }

        Ok(Self {
            camera,
            shutter,
            iso,
            remote_release,
            ui_lock,
            shutter_choices: Vec::new(),
            iso_choices: Vec::new(),
            bulb_choice: None,
            iso_auto_choice: None,
        })
    }

    fn set_ui_lock(&mut self, locked: bool) -> Result<(), SdkError> {
        let Some(toggle) = &self.ui_lock else {
            return Ok(());
        };
        toggle.set_toggled(locked);
        self.camera.set_config(toggle).wait().map_err(sdk_err)
    }

    fn press_choice(&mut self, choice: &str) -> Result<(), SdkError> {
        self.remote_release.set_choice(choice).map_err(sdk_err)?;
        self.camera.set_config(&self.remote_release).wait().map_err(sdk_err)
    }
}

impl CameraSession for Gphoto2Session {
    fn lock_ui(&mut self) -> Result<(), SdkError> {
        self.set_ui_lock(true)
    }

    fn unlock_ui(&mut self) -> Result<(), SdkError> {
        self.set_ui_lock(false)
    }

    fn close(&mut self) -> Result<(), SdkError> {
        // libgphoto2 releases the device when the camera handle drops
        Ok(())
    }

    fn advertised(&mut self, prop: CameraProp) -> Result<Vec<u32>, SdkError> {
        match prop {
            CameraProp::ShutterSpeed => {
                self.shutter_choices.clear();
                self.bulb_choice = None;
                for choice in self.shutter.choices_iter() {
                    if choice.eq_ignore_ascii_case("bulb") {
                        self.bulb_choice = Some(choice);
                        continue;
                    }
                    match tables::shutter_entry_for_label(&choice) {
                        Some(entry)
                            if !self.shutter_choices.iter().any(|(p, _)| *p == entry.param) =>
                        {
                            self.shutter_choices.push((entry.param, choice));
                        }
                        Some(_) => {}
                        None => tracing::debug!(%choice, "unrecognized shutter speed"),
                    }
                }
                Ok(self.shutter_choices.iter().map(|(param, _)| *param).collect())
            }
            CameraProp::Iso => {
                self.iso_choices.clear();
                self.iso_auto_choice = None;
                for choice in self.iso.choices_iter() {
                    if choice.eq_ignore_ascii_case("auto") {
                        self.iso_auto_choice = Some(choice);
                        continue;
                    }
                    let entry = tables::ISO_TABLE.iter().find(|e| e.label == choice.trim());
                    match entry {
                        Some(entry) => self.iso_choices.push((entry.param, choice)),
                        None => tracing::debug!(%choice, "unrecognized ISO value"),
                    }
                }
                Ok(self.iso_choices.iter().map(|(param, _)| *param).collect())
            }
        }
    }

    fn set_property(&mut self, prop: CameraProp, param: u32) -> Result<(), SdkError> {
        let (widget, choice) = match prop {
            CameraProp::ShutterSpeed => {
                let choice = if param == tables::BULB_PARAM {
                    self.bulb_choice.clone()
                } else {
                    self.shutter_choices
                        .iter()
                        .find(|(p, _)| *p == param)
                        .map(|(_, choice)| choice.clone())
                };
                let choice = choice
                    .ok_or_else(|| SdkError::Session(format!("shutter 0x{param:02X} not advertised")))?;
                (&self.shutter, choice)
            }
            CameraProp::Iso => {
                let choice = if param == tables::ISO_AUTO_PARAM {
                    self.iso_auto_choice.clone()
                } else {
                    self.iso_choices
                        .iter()
                        .find(|(p, _)| *p == param)
                        .map(|(_, choice)| choice.clone())
                };
                let choice = choice
                    .ok_or_else(|| SdkError::Session(format!("ISO 0x{param:02X} not advertised")))?;
                (&self.iso, choice)
            }
        };

        widget.set_choice(&choice).map_err(sdk_err)?;
        self.camera.set_config(widget).wait().map_err(sdk_err)
    }

    fn press_shutter(&mut self) -> Result<(), SdkError> {
        self.press_choice(PRESS_CHOICE)
    }

    fn release_shutter(&mut self) -> Result<(), SdkError> {
        self.press_choice(RELEASE_CHOICE)
    }

    fn drain_events(&mut self) -> Result<(), SdkError> {
        loop {
            match self
                .camera
                .wait_event(Duration::from_millis(10))
                .wait()
                .map_err(sdk_err)?
            {
                CameraEvent::Timeout => return Ok(()),
                event => tracing::trace!(?event, "dropping camera event"),
            }
        }
    }
}
