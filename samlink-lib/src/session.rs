//! Reshaping device strips into fixed-width reporting series.
//!
//! The device's feed granularity (one strip at a time) rarely matches the
//! desired reporting row width, so the [Accumulator] decouples the two:
//! every absorbed strip is normalized to exactly `shots_per_strip` shots,
//! buffered per shooter, and rolled over into a completed series whenever
//! the buffer reaches `shots_per_series`.
//!
//! [run_session] ties the accumulator to a [LinkDriver] and an operator
//! control channel into the complete ingest loop.

use std::io::{Read, Write};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::Serialize;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::link::{LinkDriver, Poll};
use crate::transmission::{Shot, Transmission};
use crate::{Error, Result};

/// Strip sizes the device can physically score.
pub const STRIP_SIZES: [usize; 4] = [1, 2, 5, 10];

/// One completed reporting row of exactly `shots_per_series` shots.
pub type Series = Vec<Shot>;

/// Session parameters fixed at startup.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct SessionConfig {
    /// Shots on one physical strip. Must be one of [STRIP_SIZES].
    pub shots_per_strip: usize,
    /// Shots in one reporting series. Must be 1, 2, 5, or a multiple
    /// of 10.
    pub shots_per_series: usize,
    /// Wait between polls when the device has no new data; also the
    /// window in which operator control signals are observed.
    #[builder(default = Duration::from_millis(500))]
    pub idle_wait: Duration,
}

impl SessionConfig {
    /// Check the startup preconditions.
    ///
    /// # Errors
    /// [Error::ConfigInvalid] for sizes outside the allowed sets.
    pub fn validate(&self) -> Result<()> {
        if !STRIP_SIZES.contains(&self.shots_per_strip) {
            return Err(Error::ConfigInvalid(format!(
                "shots per strip must be one of {STRIP_SIZES:?}, got {}",
                self.shots_per_strip
            )));
        }
        let n = self.shots_per_series;
        if !(n == 1 || n == 2 || n == 5 || (n > 0 && n % 10 == 0)) {
            return Err(Error::ConfigInvalid(format!(
                "shots per series must be 1, 2, 5, or a multiple of 10, got {n}"
            )));
        }
        Ok(())
    }
}

/// Per-shooter state, exclusively owned by the [Accumulator].
#[derive(Debug)]
struct ShooterState {
    name: String,
    /// Completed series, oldest first.
    series: Vec<Series>,
    /// Shots not yet forming a full series.
    buffer: Vec<Shot>,
    strips: usize,
}

impl ShooterState {
    fn new(name: &str) -> Self {
        ShooterState {
            name: name.to_string(),
            series: Vec::new(),
            buffer: Vec::new(),
            strips: 0,
        }
    }
}

/// Per-shooter output of a finalized session.
#[derive(Debug, Clone, Serialize)]
pub struct ShooterReport {
    pub name: String,
    /// Completed series, each exactly `shots_per_series` long.
    pub series: Vec<Series>,
    /// Strips absorbed for this shooter.
    pub strips: usize,
}

/// Accumulates decoded strips into per-shooter series.
///
/// Not internally synchronized; the protocol is strictly serial so all
/// mutation happens from the single ingest loop.
#[derive(Debug)]
pub struct Accumulator {
    config: SessionConfig,
    /// Registration order is preserved for reporting.
    shooters: Vec<ShooterState>,
    current: Option<usize>,
    registrations: usize,
}

impl Accumulator {
    /// # Errors
    /// [Error::ConfigInvalid] if `config` fails [SessionConfig::validate].
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Accumulator {
            config,
            shooters: Vec::new(),
            current: None,
            registrations: 0,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Total register calls, counting re-registrations.
    #[must_use]
    pub fn registrations(&self) -> usize {
        self.registrations
    }

    #[must_use]
    pub fn current_shooter(&self) -> Option<&str> {
        self.current.map(|i| self.shooters[i].name.as_str())
    }

    /// Make `name` the current shooter and reset their strip counter.
    ///
    /// Registering a name again resumes that shooter's existing session:
    /// completed series are kept, but a partial buffer is discarded since
    /// its strips cannot be re-associated after an interruption.
    pub fn register_shooter(&mut self, name: &str) {
        self.registrations += 1;
        let idx = match self.shooters.iter().position(|s| s.name == name) {
            Some(idx) => {
                let state = &mut self.shooters[idx];
                if !state.buffer.is_empty() {
                    warn!(
                        shooter = name,
                        dropped = state.buffer.len(),
                        "re-registration discards partial buffer"
                    );
                    state.buffer.clear();
                }
                state.strips = 0;
                idx
            }
            None => {
                self.shooters.push(ShooterState::new(name));
                self.shooters.len() - 1
            }
        };
        debug!(shooter = name, "shooter registered");
        self.current = Some(idx);
    }

    /// Absorb one strip for the current shooter and return their strip
    /// count so far.
    ///
    /// The transmission's valid shots are truncated or right-padded with
    /// synthetic misses to exactly `shots_per_strip`, appended to the
    /// shooter's buffer, and full series are rolled off the front of the
    /// buffer.
    ///
    /// # Errors
    /// [Error::NoActiveShooter] if no shooter has been registered.
    pub fn absorb_strip(&mut self, transmission: &Transmission) -> Result<usize> {
        let idx = self.current.ok_or(Error::NoActiveShooter)?;
        let per_strip = self.config.shots_per_strip;
        let per_series = self.config.shots_per_series;

        let mut shots = transmission.valid_shots();
        if shots.len() > per_strip {
            debug!(
                got = shots.len(),
                keeping = per_strip,
                "more valid shots than strip size, truncating"
            );
            shots.truncate(per_strip);
        } else {
            shots.resize(per_strip, Shot::miss());
        }

        let state = &mut self.shooters[idx];
        state.buffer.extend(shots);
        state.strips += 1;

        // Normally fires at most once since the series size is a clean
        // multiple of the strip size; with an uneven pairing the
        // remainder is carried forward intact.
        while state.buffer.len() >= per_series {
            let series: Series = state.buffer.drain(..per_series).collect();
            state.series.push(series);
            debug!(
                shooter = %state.name,
                series = state.series.len(),
                carried = state.buffer.len(),
                "series completed"
            );
        }

        Ok(state.strips)
    }

    /// Completed series count for the current shooter.
    #[must_use]
    pub fn completed_series(&self) -> usize {
        self.current.map_or(0, |i| self.shooters[i].series.len())
    }

    /// Shots buffered for the current shooter that do not yet form a
    /// full series. Always strictly less than `shots_per_series`.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.current.map_or(0, |i| self.shooters[i].buffer.len())
    }

    /// End the session and emit per-shooter reports in registration
    /// order.
    ///
    /// Shooters without a single completed series are dropped, guarding
    /// against a registration that never received data. Partial buffers
    /// are discarded, never padded into a final series.
    #[must_use]
    pub fn finalize(self) -> Vec<ShooterReport> {
        self.shooters
            .into_iter()
            .filter_map(|state| {
                if state.series.is_empty() {
                    debug!(shooter = %state.name, "no completed series, dropping");
                    return None;
                }
                if !state.buffer.is_empty() {
                    info!(
                        shooter = %state.name,
                        leftover = state.buffer.len(),
                        "discarding partial series buffer"
                    );
                }
                Some(ShooterReport {
                    name: state.name,
                    series: state.series,
                    strips: state.strips,
                })
            })
            .collect()
    }
}

/// Operator session control, observed between poll cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// Switch accumulation to the named shooter.
    NextShooter(String),
    /// Deactivate the device and finish the session.
    EndSession,
}

/// Progress notifications from [run_session].
#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// A strip was absorbed for `shooter`.
    StripAccepted {
        shooter: &'a str,
        strips: usize,
        completed_series: usize,
    },
    /// Checksum retries were exhausted; the strip must be re-presented.
    StripAbandoned { attempts: u32 },
    ShooterChanged { name: &'a str },
}

enum Flow {
    Continue,
    End,
}

/// Run the ingest loop until the operator ends the session or a fatal
/// link fault occurs.
///
/// Control signals are only observed between poll cycles, never during an
/// in-progress frame read, and the check is bounded by the configured
/// idle wait so it cannot delay the next poll. An abandoned frame is
/// reported through `on_event` and the loop continues; any other fault
/// sends the deactivate signal best-effort and propagates.
///
/// On a controlled end the deactivate signal is sent before returning;
/// failure to send it is logged, not escalated, so accumulated results
/// stay reachable.
///
/// # Errors
/// Fatal [crate::link] faults, or [Error::NoActiveShooter] if a strip
/// arrives before any registration.
pub fn run_session<P: Read + Write>(
    driver: &mut LinkDriver<P>,
    acc: &mut Accumulator,
    controls: &Receiver<ControlSignal>,
    mut on_event: impl FnMut(SessionEvent<'_>),
) -> Result<()> {
    let idle = acc.config().idle_wait;
    loop {
        // Non-blocking control check between cycles.
        let flow = match controls.try_recv() {
            Ok(signal) => apply_signal(acc, signal, &mut on_event),
            Err(TryRecvError::Empty) => Flow::Continue,
            Err(TryRecvError::Disconnected) => Flow::End,
        };
        if let Flow::End = flow {
            driver.deactivate_best_effort();
            return Ok(());
        }

        match driver.poll() {
            Ok(Poll::NoData) => {}
            Ok(Poll::Strip(transmission)) => {
                let strips = match acc.absorb_strip(&transmission) {
                    Ok(strips) => strips,
                    Err(err) => {
                        driver.deactivate_best_effort();
                        return Err(err);
                    }
                };
                on_event(SessionEvent::StripAccepted {
                    shooter: acc.current_shooter().unwrap_or_default(),
                    strips,
                    completed_series: acc.completed_series(),
                });
            }
            Err(Error::FrameAbandoned { attempts }) => {
                warn!(attempts, "frame abandoned, strip must be re-presented");
                on_event(SessionEvent::StripAbandoned { attempts });
            }
            Err(err) => {
                driver.deactivate_best_effort();
                return Err(err);
            }
        }

        // The idle wait doubles as the time-boxed control window.
        let flow = match controls.recv_timeout(idle) {
            Ok(signal) => apply_signal(acc, signal, &mut on_event),
            Err(RecvTimeoutError::Timeout) => Flow::Continue,
            Err(RecvTimeoutError::Disconnected) => Flow::End,
        };
        if let Flow::End = flow {
            driver.deactivate_best_effort();
            return Ok(());
        }
    }
}

fn apply_signal(
    acc: &mut Accumulator,
    signal: ControlSignal,
    on_event: &mut impl FnMut(SessionEvent<'_>),
) -> Flow {
    match signal {
        ControlSignal::NextShooter(name) => {
            acc.register_shooter(&name);
            on_event(SessionEvent::ShooterChanged { name: &name });
            Flow::Continue
        }
        ControlSignal::EndSession => {
            info!("session ended by operator");
            Flow::End
        }
    }
}
