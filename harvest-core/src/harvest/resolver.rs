use tracing::{debug, info, warn};

use crate::browser::{ElementInfo, ElementSnapshot, Locator, Needle, PortalDriver, Scope};
use crate::poll::PollPolicy;

/// One ranked way of finding a trigger control.
#[derive(Debug, Clone, Copy)]
pub struct TriggerRule {
    pub name: &'static str,
    pub locator: Locator,
    /// Skip the content check and take the first visible match.
    pub accept_any: bool,
}

/// Trigger heuristics in priority order; tier numbers are 1-based positions.
pub const TRIGGER_RULES: &[TriggerRule] = &[
    TriggerRule {
        name: "open-recording class",
        locator: Locator::tags(&["a"]).all(&[Needle::class("open_recording")]),
        accept_any: false,
    },
    TriggerRule {
        name: "download-link class",
        locator: Locator::tags(&["a"])
            .all(&[Needle::class("download_link"), Needle::href("download=1")]),
        accept_any: false,
    },
    TriggerRule {
        name: "play/record onclick",
        locator: Locator::tags(&["a"]).any(&[Needle::onclick("play"), Needle::onclick("record")]),
        accept_any: false,
    },
    TriggerRule {
        name: "sound class",
        locator: Locator::tags(&["a"]).all(&[Needle::class("sound")]),
        accept_any: false,
    },
    TriggerRule {
        name: "icon font",
        locator: Locator::tags(&["i"])
            .all(&[Needle::class("fa")])
            .any(&[
                Needle::class("play"),
                Needle::class("sound"),
                Needle::class("volume"),
            ])
            .climb_to(&["a", "button"]),
        accept_any: false,
    },
    TriggerRule {
        name: "play button",
        locator: Locator::tags(&["button"]).all(&[Needle::onclick("play")]),
        accept_any: false,
    },
    TriggerRule {
        name: "media href",
        locator: Locator::tags(&["a"]).any(&[
            Needle::href("play"),
            Needle::href("record"),
            Needle::href("download"),
        ]),
        accept_any: false,
    },
    // Broad compatibility at the cost of possible false positives.
    TriggerRule {
        name: "any anchor or button",
        locator: Locator::tags(&["a", "button"]),
        accept_any: true,
    },
];

/// Download-action tiers, searched against the whole document.
pub const ACTION_RULES: &[(&str, Locator)] = &[
    (
        "exact selector",
        Locator::tags(&["a"]).all(&[Needle::class("download_link"), Needle::href("download=1")]),
    ),
    (
        "broader selector",
        Locator::tags(&["a"]).any(&[
            Needle::href("download=1"),
            Needle::text("download"),
            Needle::class("download_link"),
        ]),
    ),
    (
        "anchor scan",
        Locator::tags(&["a"]).any(&[
            Needle::href("download"),
            Needle::text("download"),
            Needle::text("save"),
        ]),
    ),
];

pub const SCAN_AND_CLICK_SCRIPT: &str = r#"
(() => {
    const lower = value => (value || '').toLowerCase();
    const match = [...document.querySelectorAll('a')].find(a =>
        lower(a.href).includes('download=1') ||
        lower(a.href).includes('download') ||
        lower(a.innerText).includes('download') ||
        lower(a.innerText).includes('save'));
    if (!match) {
        return null;
    }
    match.click();
    return match.href || match.innerText;
})()
"#;

const CONTENT_KEYWORDS: &[&str] = &["download", "play", "record", "open_recording", "volume"];

/// Secondary acceptance check applied to every non catch-all match.
pub fn looks_like_recording_control(info: &ElementInfo) -> bool {
    [&info.href, &info.text, &info.class].iter().any(|value| {
        let value = value.to_lowercase();
        CONTENT_KEYWORDS.iter().any(|keyword| value.contains(keyword))
    })
}

#[derive(Debug)]
pub struct TriggerCandidate<H> {
    pub handle: H,
    pub tier: usize,
    pub rule: &'static str,
    pub info: ElementInfo,
}

#[derive(Debug)]
pub enum ActionResolution<H> {
    /// A visible control the caller still has to click.
    Found(TriggerCandidate<H>),
    /// The scan-and-click script already clicked something; carries what it reported.
    ScriptClicked(String),
}

#[derive(Debug, Clone)]
pub struct ControlResolver {
    action_wait: PollPolicy,
}

impl ControlResolver {
    pub fn new(action_wait: PollPolicy) -> Self {
        Self { action_wait }
    }

    /// Runs the ranked trigger search in `scope`; the first visible match that
    /// passes its rule's acceptance wins.
    pub async fn resolve_trigger<D: PortalDriver>(
        &self,
        driver: &mut D,
        scope: Scope<'_, D::Handle>,
    ) -> Option<TriggerCandidate<D::Handle>> {
        for (index, rule) in TRIGGER_RULES.iter().enumerate() {
            let snapshots = match driver.query(scope, &rule.locator).await {
                Ok(snapshots) => snapshots,
                Err(err) => {
                    warn!(rule = rule.name, error = %err, "trigger query failed");
                    continue;
                }
            };
            let accepted = snapshots.into_iter().find(|snapshot| {
                snapshot.info.visible
                    && (rule.accept_any || looks_like_recording_control(&snapshot.info))
            });
            if let Some(ElementSnapshot { handle, info }) = accepted {
                return Some(TriggerCandidate {
                    handle,
                    tier: index + 1,
                    rule: rule.name,
                    info,
                });
            }
        }
        None
    }

    /// Waits for the player's download action. Tiers are retried on every poll
    /// until the wait expires, then the scan-and-click script gets one try.
    /// The control that opened the player never counts as its action.
    pub async fn resolve_download_action<D: PortalDriver>(
        &self,
        driver: &mut D,
        trigger: &ElementInfo,
    ) -> Option<ActionResolution<D::Handle>> {
        let mut poller = self.action_wait.start();
        loop {
            if let Some(found) = find_action(driver, trigger).await {
                info!(tier = found.tier, rule = found.rule, "download action found");
                return Some(ActionResolution::Found(found));
            }
            if !poller.tick().await {
                break;
            }
        }

        match driver.run_click_script(SCAN_AND_CLICK_SCRIPT).await {
            Ok(Some(matched)) => {
                info!(matched = %matched, "download triggered by scripted scan");
                Some(ActionResolution::ScriptClicked(matched))
            }
            Ok(None) => None,
            Err(err) => {
                debug!(error = %err, "scripted download scan failed");
                None
            }
        }
    }
}

async fn find_action<D: PortalDriver>(
    driver: &mut D,
    trigger: &ElementInfo,
) -> Option<TriggerCandidate<D::Handle>> {
    for (index, &(name, ref locator)) in ACTION_RULES.iter().enumerate() {
        let snapshots = match driver.query(Scope::Document, locator).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                warn!(rule = name, error = %err, "action query failed");
                continue;
            }
        };
        if let Some(ElementSnapshot { handle, info }) = snapshots
            .into_iter()
            .find(|snapshot| snapshot.info.visible && !same_control(&snapshot.info, trigger))
        {
            return Some(TriggerCandidate {
                handle,
                tier: index + 1,
                rule: name,
                info,
            });
        }
    }
    None
}

fn same_control(a: &ElementInfo, b: &ElementInfo) -> bool {
    a.tag == b.tag && a.id == b.id && a.class == b.class && a.href == b.href && a.text == b.text
}
