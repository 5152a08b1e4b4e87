use crate::probe::command::{SENTINEL, SYSTEM_SECTIONS};
use crate::probe::executor::ExecError;
use crate::status::{now_unix, Status, UnitStatus};
use tracing::warn;

/// Cuts captured stdout back into sections and maps them onto a [`Status`].
///
/// Fewer than three sections is a failed probe; the transport error wins over
/// the generic malformed-response message. Otherwise sections 0..3 are the
/// system blocks, the sections after them belong to `units` positionally, and
/// the final section (whatever followed the last sentinel) is dropped.
pub fn parse_response<S: AsRef<str>>(
    output: &[u8],
    units: &[S],
    exec_err: Option<&ExecError>,
) -> Status {
    parse_response_at(now_unix(), output, units, exec_err)
}

pub fn parse_response_at<S: AsRef<str>>(
    timestamp: i64,
    output: &[u8],
    units: &[S],
    exec_err: Option<&ExecError>,
) -> Status {
    let text = String::from_utf8_lossy(output);
    let delimiter = format!("{SENTINEL}\n");
    let sections: Vec<&str> = text.split(delimiter.as_str()).collect();

    if sections.len() < SYSTEM_SECTIONS {
        let error = match exec_err {
            Some(err) => err.to_string(),
            None => format!("malformed response: {text}"),
        };
        return Status::failed(timestamp, error);
    }

    let unit_sections = sections
        .get(SYSTEM_SECTIONS..sections.len() - 1)
        .unwrap_or_default();

    if unit_sections.len() > units.len() {
        warn!(
            configured = units.len(),
            reported = unit_sections.len(),
            "more unit sections than configured units, dropping the extra ones"
        );
    } else if unit_sections.len() < units.len() {
        warn!(
            configured = units.len(),
            reported = unit_sections.len(),
            stopped_at = %units[unit_sections.len()].as_ref(),
            "unit checks stopped before the last configured unit"
        );
    }

    let unit_statuses = units
        .iter()
        .zip(unit_sections)
        .map(|(name, section)| UnitStatus {
            name: name.as_ref().to_string(),
            running: true,
            status: (*section).to_string(),
        })
        .collect();

    Status::succeeded(
        timestamp,
        sections[0].to_string(),
        sections[1].to_string(),
        sections[2].to_string(),
        unit_statuses,
    )
}
