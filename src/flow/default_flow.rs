//! Built-in walk through the Envizom dashboard: login, overview, then the AQI filter form.

use super::{ElementTarget, Flow, FlowStep};

const OVERVIEW_TIMEOUT_MS: u64 = 60_000;

fn phase(label: &str) -> FlowStep {
    FlowStep::Phase {
        label: label.to_string(),
    }
}

fn click(target: ElementTarget) -> FlowStep {
    FlowStep::Click {
        target,
        timeout_ms: None,
    }
}

fn fill(selector: &str, value: &str) -> FlowStep {
    FlowStep::Fill {
        selector: selector.to_string(),
        value: value.to_string(),
        timeout_ms: None,
    }
}

fn settle(quiet_ms: u64, max_ms: u64) -> FlowStep {
    FlowStep::Settle { quiet_ms, max_ms }
}

pub fn envizom_aqi_flow() -> Flow {
    let login_button = ElementTarget::css("button").with_text("LOG IN").exact();
    let device_type = ElementTarget::css("input[formcontrolname=\"deviceType\"]").nth(0);

    Flow {
        name: "envizom-aqi".to_string(),
        steps: vec![
            phase("login"),
            FlowStep::Goto {
                url: "{start_url}".to_string(),
                timeout_ms: None,
            },
            fill("input[placeholder*=\"email\" i]", "{email}"),
            fill("input[placeholder*=\"password\" i]", "{password}"),
            click(ElementTarget::css("mat-checkbox")),
            click(ElementTarget::css("button").with_text("agree")),
            FlowStep::WaitForEnabled {
                target: login_button.clone(),
                timeout_ms: None,
            },
            click(login_button),
            FlowStep::WaitForResponse {
                method: None,
                path_contains: Some("/users/login".to_string()),
                status: None,
                timeout_ms: None,
            },
            phase("overview"),
            FlowStep::WaitForUrl {
                contains: "overview/map".to_string(),
                timeout_ms: Some(OVERVIEW_TIMEOUT_MS),
            },
            settle(2_000, 15_000),
            phase("aqi"),
            FlowStep::Goto {
                url: "{aqi_url}".to_string(),
                timeout_ms: None,
            },
            settle(2_000, 15_000),
            FlowStep::WaitForSelector {
                target: device_type.clone(),
                timeout_ms: None,
            },
            click(device_type),
            click(ElementTarget::css("mat-option").nth(0)),
            click(ElementTarget::css("input[formcontrolname=\"startDate\"]").nth(0)),
            click(ElementTarget::css(".mat-calendar-body-cell-content").nth(-1)),
            click(ElementTarget::css("input[formcontrolname=\"selectedTime\"]").nth(0)),
            click(
                ElementTarget::css(".clock-face__number span")
                    .with_text("{previous_hour}")
                    .exact(),
            ),
            click(ElementTarget::css("button").with_text("Ok").exact()),
            phase("aqi-apply"),
            FlowStep::Reset { label: None },
            click(ElementTarget::css("button").with_text("apply")),
            settle(3_000, 15_000),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flow_is_valid_and_phased() {
        let flow = envizom_aqi_flow();
        assert!(flow.validate().is_ok());
        let phases: Vec<_> = flow
            .steps
            .iter()
            .filter_map(|step| match step {
                FlowStep::Phase { label } => Some(label.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec!["login", "overview", "aqi", "aqi-apply"]);
        assert!(matches!(flow.steps[0], FlowStep::Phase { .. }));
    }

    #[test]
    fn apply_phase_starts_from_empty_bucket() {
        let flow = envizom_aqi_flow();
        let apply = flow
            .steps
            .iter()
            .position(|step| matches!(step, FlowStep::Phase { label } if label == "aqi-apply"))
            .expect("apply phase");
        assert_eq!(flow.steps[apply + 1], FlowStep::Reset { label: None });
    }
}
