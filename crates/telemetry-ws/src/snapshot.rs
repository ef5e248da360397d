//! Snapshot assembly from the broadcaster's shadow state.
//!
//! The broadcaster keeps copies of the latest OutSim frame, MCI car list,
//! focus PLID, track/car context and lap fields under one lock; a snapshot
//! copies them out in a single critical section so no field can be older
//! than another within one message.

use pitwall_insim::CarInfo;
use pitwall_outsim::OutSimFrame;
use pitwall_session::{DEFAULT_RADAR_RANGE_M, compute_radar_targets};
use serde::Serialize;

/// Simulator integer units per metre in MCI coordinates.
const DISTANCE_SCALE: f64 = 65_536.0;
/// Simulator speed units per metre-per-second in MCI entries.
const SPEED_SCALE: f64 = 100.0;

/// Lap fields pushed by the session engine.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerLapUpdate {
    pub progress: Option<f64>,
    pub current_lap_ms: Option<u32>,
    pub reference_lap_ms: Option<u32>,
    pub delta_ms: Option<i64>,
}

/// Shadow state guarded by the broadcaster's mutex.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub latest_frame: Option<OutSimFrame>,
    pub latest_cars: Vec<CarInfo>,
    pub focus_plid: Option<u8>,
    pub track: Option<String>,
    pub car: Option<String>,
    pub lap: PlayerLapUpdate,
}

#[derive(Debug, Serialize)]
pub(crate) struct OutSimPayload {
    time_ms: u32,
    ang_vel: [f32; 3],
    heading: [f32; 3],
    acceleration: [f32; 3],
    velocity: [f32; 3],
    position: [f32; 3],
    speed: f64,
}

/// One car with coordinates scaled to metres and speed to m/s.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct CarPayload {
    plid: u8,
    node: u16,
    lap: u16,
    position: u8,
    info: u8,
    spare: u8,
    x: f64,
    y: f64,
    z: f64,
    speed: f64,
    direction: u16,
    heading: u16,
    angular_velocity: i16,
}

#[derive(Debug, Serialize)]
pub(crate) struct Coordinates {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct Orientation {
    yaw: f64,
    pitch: f64,
    roll: f64,
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct LapSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    number: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    race_position: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta_ms: Option<i64>,
}

impl LapSection {
    fn is_empty(&self) -> bool {
        self.number.is_none()
            && self.race_position.is_none()
            && self.progress.is_none()
            && self.current_ms.is_none()
            && self.reference_ms.is_none()
            && self.delta_ms.is_none()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RadarTargetPayload {
    distance: f64,
    bearing: f64,
    offset: Offset,
}

#[derive(Debug, Serialize)]
pub(crate) struct Offset {
    x: f64,
    y: f64,
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct PlayerPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    z: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heading_vector: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    velocity: Option<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    orientation: Option<Orientation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plid: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lap_progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lap_time_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lap: Option<LapSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    radar_targets: Option<Vec<RadarTargetPayload>>,
}

/// Materialised view of the most recent telemetry samples.
#[derive(Debug, Serialize)]
pub(crate) struct Snapshot {
    timestamp: f64,
    outsim: Option<OutSimPayload>,
    cars: Vec<CarPayload>,
    focused_car: Option<CarPayload>,
    track: Option<String>,
    car: Option<String>,
    player: Option<PlayerPayload>,
    radar_targets: Vec<RadarTargetPayload>,
}

fn outsim_payload(frame: &OutSimFrame) -> OutSimPayload {
    OutSimPayload {
        time_ms: frame.time_ms,
        ang_vel: frame.ang_vel,
        heading: frame.heading,
        acceleration: frame.accel,
        velocity: frame.velocity,
        position: frame.position,
        speed: frame.speed(),
    }
}

fn car_payload(car: &CarInfo) -> CarPayload {
    CarPayload {
        plid: car.plid,
        node: car.node,
        lap: car.lap,
        position: car.position,
        info: car.info,
        spare: car.spare,
        x: f64::from(car.x) / DISTANCE_SCALE,
        y: f64::from(car.y) / DISTANCE_SCALE,
        z: f64::from(car.z) / DISTANCE_SCALE,
        speed: f64::from(car.speed) / SPEED_SCALE,
        direction: car.direction,
        heading: car.heading,
        angular_velocity: car.angular_velocity,
    }
}

/// Build a snapshot from the shadow state, or nothing when no telemetry has
/// arrived yet.
pub(crate) fn build_snapshot(shared: &Shared, timestamp: f64) -> Option<Snapshot> {
    if shared.latest_frame.is_none() && shared.latest_cars.is_empty() {
        return None;
    }

    let outsim = shared.latest_frame.as_ref().map(outsim_payload);
    let cars: Vec<CarPayload> = shared.latest_cars.iter().map(car_payload).collect();
    let focused_car = shared.focus_plid.and_then(|focus| {
        shared
            .latest_cars
            .iter()
            .find(|car| car.plid == focus)
            .map(car_payload)
    });
    let focused_info = shared
        .focus_plid
        .and_then(|focus| shared.latest_cars.iter().find(|car| car.plid == focus));

    let lap = shared.lap;
    let mut radar_targets = Vec::new();

    let has_player_data = focused_car.is_some()
        || shared.latest_frame.is_some()
        || lap.progress.is_some()
        || lap.current_lap_ms.is_some()
        || lap.reference_lap_ms.is_some()
        || lap.delta_ms.is_some();

    let player = if has_player_data {
        let mut player = PlayerPayload::default();

        if let Some(frame) = &shared.latest_frame {
            let [px, py, pz] = frame.position.map(f64::from);
            let (yaw, pitch, roll) = frame.yaw_pitch_roll();
            player.x = Some(px);
            player.y = Some(py);
            player.z = Some(pz);
            player.position = Some(Coordinates {
                x: px,
                y: py,
                z: pz,
            });
            player.heading_vector = Some(frame.heading);
            player.velocity = Some(frame.velocity);
            player.speed = Some(frame.speed());
            player.heading = Some(yaw);
            player.orientation = Some(Orientation { yaw, pitch, roll });
            player.time_ms = Some(frame.time_ms);

            let others: Vec<(f64, f64)> = shared
                .latest_cars
                .iter()
                .filter(|car| shared.focus_plid != Some(car.plid))
                .map(|car| {
                    (
                        f64::from(car.x) / DISTANCE_SCALE,
                        f64::from(car.y) / DISTANCE_SCALE,
                    )
                })
                .collect();
            if !others.is_empty() {
                radar_targets = compute_radar_targets((px, py), yaw, &others, DEFAULT_RADAR_RANGE_M)
                    .into_iter()
                    .map(|target| RadarTargetPayload {
                        distance: target.distance,
                        bearing: target.bearing,
                        offset: Offset {
                            x: target.offset_x,
                            y: target.offset_y,
                        },
                    })
                    .collect();
                if !radar_targets.is_empty() {
                    player.radar_targets = Some(
                        radar_targets
                            .iter()
                            .map(|target| RadarTargetPayload {
                                distance: target.distance,
                                bearing: target.bearing,
                                offset: Offset {
                                    x: target.offset.x,
                                    y: target.offset.y,
                                },
                            })
                            .collect(),
                    );
                }
            }
        }

        if let Some(info) = focused_info {
            player.plid = Some(info.plid);
            if player.x.is_none() {
                player.x = Some(f64::from(info.x) / DISTANCE_SCALE);
                player.y = Some(f64::from(info.y) / DISTANCE_SCALE);
                player.z = Some(f64::from(info.z) / DISTANCE_SCALE);
            }
            if player.speed.is_none() {
                player.speed = Some(f64::from(info.speed) / SPEED_SCALE);
            }
        }

        let mut section = LapSection::default();
        if let Some(info) = focused_info {
            section.number = Some(info.lap);
            section.race_position = Some(info.position);
        }
        if let Some(progress) = lap.progress {
            let clamped = progress.clamp(0.0, 1.0);
            section.progress = Some(clamped);
            player.lap_progress = Some(clamped);
        }
        if let Some(current) = lap.current_lap_ms {
            section.current_ms = Some(current);
            player.lap_time_ms = Some(current);
        }
        section.reference_ms = lap.reference_lap_ms;
        if let Some(delta) = lap.delta_ms {
            section.delta_ms = Some(delta);
            player.delta_ms = Some(delta);
            player.delta = Some(delta as f64 / 1000.0);
        }
        if !section.is_empty() {
            player.lap = Some(section);
        }

        Some(player)
    } else {
        None
    };

    Some(Snapshot {
        timestamp,
        outsim,
        cars,
        focused_car,
        track: shared.track.clone(),
        car: shared.car.clone(),
        player,
        radar_targets,
    })
}
