//! HTML fragments for the htmx front-end.
//!
//! Every builder takes a state snapshot; nothing here touches the lock or
//! the queue. The markup follows the swap conventions of the client: posts
//! target either the enclosing fragment or the `#content` container.

use crate::state::SharedState;
use std::fmt::Write;

const SWAP: &str = "hx-swap=\"outerHTML swap:1s\"";

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// `5`, `2.5` or `1/60`, whichever reads best for the given length.
pub fn exposure_seconds(exposure_us: i64) -> String {
    if exposure_us <= 0 {
        return "0".to_owned();
    }
    if exposure_us < 300_000 {
        return format!("1/{}", (1_000_000.0 / exposure_us as f64).round());
    }
    let seconds = exposure_us as f64 / 1_000_000.0;
    if seconds.fract() == 0.0 {
        format!("{seconds:.0}")
    } else {
        format!("{seconds:.1}")
    }
}

pub fn page(state: &SharedState) -> String {
    format!(
        "<!doctype html>\
         <html lang=\"en\">\
         <head>\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\" />\
         <link rel=\"stylesheet\" href=\"assets/index.css\">\
         <script src=\"assets/htmx.min.js\"></script>\
         <script src=\"assets/index.js\"></script>\
         </head>\
         <body>{}</body>\
         </html>",
        content(state)
    )
}

/// The `#content` container: camera panel, sequence inputs, action buttons.
/// While shooting it polls `/api/camera/state` so progress stays live.
pub fn content(state: &SharedState) -> String {
    let refresh = if state.shooting {
        " hx-get=\"/api/camera/state\" hx-swap=\"outerHTML swap:1s\" hx-trigger=\"every 2s\""
    } else {
        ""
    };
    format!(
        "<div id=\"content\" class=\"content\"{refresh}>{}{}{}</div>",
        camera_panel(state),
        inputs(state),
        actions(state)
    )
}

pub fn camera_panel(state: &SharedState) -> String {
    let mut panel = String::new();
    let _ = write!(
        panel,
        "<div id=\"camera-content\" class=\"content camera\">\
         <fieldset><legend>Camera</legend>\
         <input name=\"camera\" type=\"text\" disabled value=\"{}\" />\
         </fieldset>",
        escape(if state.initialized {
            &state.description
        } else {
            "No cameras detected"
        })
    );

    if !state.initialized {
        let _ = write!(
            panel,
            "<button hx-get=\"/api/camera\" hx-target=\"#camera-content\" {SWAP}>Refresh</button>"
        );
    } else if state.connected {
        let _ = write!(
            panel,
            "<button hx-post=\"/api/camera/disconnect\" hx-target=\"#content\" {SWAP}>Disconnect</button>"
        );
    } else {
        let _ = write!(
            panel,
            "<button hx-post=\"/api/camera/connect\" hx-target=\"#content\" {SWAP}>Connect</button>"
        );
    }

    panel.push_str("</div>");
    panel
}

pub fn number_input(name: &str, value: i64, enabled: bool) -> String {
    format!(
        "<input type=\"number\" name=\"{name}\" value=\"{value}\" min=\"0\" \
         inputmode=\"decimal\" hx-post=\"/api/camera/state/{name}\" {SWAP}{} />",
        if enabled { "" } else { " disabled" }
    )
}

pub fn exposure_fragment(state: &SharedState) -> String {
    let enabled = !state.shooting;
    let mut select = format!(
        "<div class=\"exposure\" id=\"exposure-input\">\
         <select name=\"exposure\" hx-post=\"/api/camera/state/exposure\" \
         hx-include=\"#exposure-input\" hx-target=\"#exposure-input\" {SWAP}{}>",
        if enabled { "" } else { " disabled" }
    );

    for (index, entry) in state.shutter_table.iter().enumerate() {
        let _ = write!(
            select,
            "<option value=\"{index}\"{}>{}</option>",
            if index == state.exposure_index { " selected" } else { "" },
            escape(entry.label)
        );
    }
    let _ = write!(
        select,
        "<option value=\"{}\"{}>Bulb</option></select>",
        state.shutter_table.len(),
        if state.bulb_selected() { " selected" } else { "" }
    );

    let _ = write!(
        select,
        "<input type=\"number\" name=\"exposure-custom\" value=\"{}\" min=\"0\" step=\"0.1\" \
         hx-post=\"/api/camera/state/exposure\" hx-include=\"#exposure-input\" \
         hx-target=\"#exposure-input\" {SWAP}{} /></div>",
        exposure_seconds(state.exposure_us),
        if enabled { "" } else { " disabled" }
    );
    select
}

pub fn iso_fragment(state: &SharedState) -> String {
    let mut select = format!(
        "<select name=\"iso\" id=\"iso-input\" hx-post=\"/api/camera/state/iso\" \
         hx-target=\"#iso-input\" {SWAP}{}>",
        if state.shooting { " disabled" } else { "" }
    );
    for (index, entry) in state.iso_table.iter().enumerate() {
        let _ = write!(
            select,
            "<option value=\"{index}\"{}>{}</option>",
            if index == state.iso_index { " selected" } else { "" },
            escape(entry.label)
        );
    }
    let _ = write!(
        select,
        "<option value=\"{}\"{}>Auto</option></select>",
        state.iso_table.len(),
        if state.iso_auto_selected() { " selected" } else { "" }
    );
    select
}

fn inputs(state: &SharedState) -> String {
    let enabled = !state.shooting;
    format!(
        "<div class=\"content inputs\">\
         <fieldset><legend>Delay (seconds)</legend><div>{}</div></fieldset>\
         <fieldset><legend>Exposure (seconds)</legend>{}</fieldset>\
         <fieldset><legend>ISO</legend><div class=\"iso\">{}</div></fieldset>\
         <fieldset><legend>Interval (seconds)</legend><div class=\"interval\">{}</div></fieldset>\
         <fieldset><legend>Frames</legend><div class=\"frames\">{}</div></fieldset>\
         </div>",
        number_input("delay", state.delay_us / 1_000_000, enabled),
        exposure_fragment(state),
        iso_fragment(state),
        number_input("interval", state.interval_us / 1_000_000, enabled),
        number_input("frames", state.frames, enabled),
    )
}

fn actions(state: &SharedState) -> String {
    let ready = state.initialized && state.connected;
    let mut buttons = String::from("<div class=\"content actions\">");

    let _ = write!(
        buttons,
        "<button hx-post=\"/api/camera/start-shoot\" hx-target=\"#content\" {SWAP}{}>Start</button>",
        if ready && !state.shooting { "" } else { " disabled" }
    );
    let _ = write!(
        buttons,
        "<button hx-post=\"/api/camera/stop-shoot\" hx-target=\"#content\" {SWAP}{}>Stop</button>",
        if ready && state.shooting { "" } else { " disabled" }
    );
    let _ = write!(
        buttons,
        "<button hx-post=\"/api/camera/take-picture\" hx-target=\"#content\" {SWAP}{}>Take Picture</button>",
        if ready && !state.shooting { "" } else { " disabled" }
    );

    if state.shooting {
        let _ = write!(
            buttons,
            "<p class=\"progress\">{} / {}</p>",
            state.frames_taken, state.frames
        );
    }

    buttons.push_str("</div>");
    buttons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables;

    fn connected_state() -> SharedState {
        SharedState {
            initialized: true,
            connected: true,
            description: "Canon EOS R6".to_owned(),
            shutter_table: tables::filter_shutter(&[0x10, 0x68]),
            iso_table: tables::filter_iso(&[0x48, 0x58]),
            ..SharedState::default()
        }
    }

    #[test]
    fn exposure_seconds_picks_a_readable_style() {
        assert_eq!(exposure_seconds(5_000_000), "5");
        assert_eq!(exposure_seconds(2_500_000), "2.5");
        assert_eq!(exposure_seconds(16_667), "1/60");
        assert_eq!(exposure_seconds(0), "0");
    }

    #[test]
    fn page_embeds_assets_and_content() {
        let html = page(&connected_state());
        assert!(html.contains("assets/htmx.min.js"));
        assert!(html.contains("id=\"content\""));
        assert!(html.contains("Canon EOS R6"));
    }

    #[test]
    fn camera_panel_offers_the_right_action() {
        let mut state = SharedState::default();
        assert!(camera_panel(&state).contains("/api/camera\""));

        state.initialized = true;
        state.description = "EOS".to_owned();
        assert!(camera_panel(&state).contains("/api/camera/connect"));

        state.connected = true;
        assert!(camera_panel(&state).contains("/api/camera/disconnect"));
    }

    #[test]
    fn exposure_select_marks_bulb_past_table_end() {
        let mut state = connected_state();
        state.exposure_index = 1;
        let fragment = exposure_fragment(&state);
        assert!(fragment.contains("<option value=\"1\" selected>1/60</option>"));
        assert!(fragment.contains("<option value=\"2\">Bulb</option>"));

        state.exposure_index = 2;
        let fragment = exposure_fragment(&state);
        assert!(fragment.contains("<option value=\"2\" selected>Bulb</option>"));
    }

    #[test]
    fn content_polls_only_while_shooting() {
        let mut state = connected_state();
        assert!(!content(&state).contains("hx-trigger=\"every 2s\""));

        state.shooting = true;
        let html = content(&state);
        assert!(html.contains("hx-trigger=\"every 2s\""));
        assert!(html.contains("0 / 2"));
    }

    #[test]
    fn description_is_escaped() {
        let mut state = connected_state();
        state.description = "EOS <R6> & \"friends\"".to_owned();
        let html = camera_panel(&state);
        assert!(html.contains("EOS &lt;R6&gt; &amp; &quot;friends&quot;"));
        assert!(!html.contains("<R6>"));
    }
}
