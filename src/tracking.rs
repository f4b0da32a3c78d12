//! Route capture while a job is in progress: validated position samples, the
//! in-memory recorder, and the persisted queue of routes that failed to
//! submit.

use std::collections::VecDeque;

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;
use crate::ids::JobId;
use crate::{EARTH_RADIUS_M, MAX_PENDING_ROUTES};

/// Version tag written into the persisted queue envelope. Bump when the
/// entry shape changes.
pub const ROUTE_QUEUE_VERSION: u32 = 1;

#[derive(Debug, Clone, Error)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

impl From<CoordinateError> for ApiError {
    fn from(e: CoordinateError) -> Self {
        ApiError::validation(e.to_string())
    }
}

/// Milliseconds since the Unix epoch. The core never reads a wall clock;
/// every timestamp comes in from a shell capability.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn elapsed_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// RFC 3339 rendering in UTC, e.g. `2025-03-01T09:30:00.000Z`. `None`
    /// when the value is outside chrono's representable range.
    #[must_use]
    pub fn to_rfc3339(self) -> Option<String> {
        let millis = i64::try_from(self.0).ok()?;
        DateTime::from_timestamp_millis(millis)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl From<u64> for UnixTimeMs {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}

/// Range check shared by position samples and job locations.
pub fn validate_lat_lon(latitude: f64, longitude: f64) -> Result<(), CoordinateError> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(CoordinateError::NonFinite);
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(CoordinateError::LatitudeOutOfRange(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(CoordinateError::LongitudeOutOfRange(longitude));
    }
    Ok(())
}

/// A position sample that passed range validation. Private fields so every
/// instance went through [`Coordinate::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    timestamp: UnixTimeMs,
}

impl Coordinate {
    pub fn new(
        latitude: f64,
        longitude: f64,
        timestamp: UnixTimeMs,
    ) -> Result<Self, CoordinateError> {
        validate_lat_lon(latitude, longitude)?;
        Ok(Self {
            latitude,
            longitude,
            timestamp,
        })
    }

    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }

    #[must_use]
    pub const fn timestamp(&self) -> UnixTimeMs {
        self.timestamp
    }

    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        haversine_distance(self, other)
    }
}

#[must_use]
pub fn haversine_distance(p1: &Coordinate, p2: &Coordinate) -> f64 {
    const EPSILON: f64 = 1e-10;

    if (p1.latitude - p2.latitude).abs() < EPSILON
        && (p1.longitude - p2.longitude).abs() < EPSILON
    {
        return 0.0;
    }

    let lat1_rad = p1.latitude.to_radians();
    let lat2_rad = p2.latitude.to_radians();
    let delta_lat = (p2.latitude - p1.latitude).to_radians();
    let delta_lon = (p2.longitude - p1.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);

    let a = a.clamp(0.0, 1.0);

    let c = 2.0 * a.sqrt().asin();

    let result = EARTH_RADIUS_M * c;

    if result.is_finite() {
        result
    } else {
        f64::MAX
    }
}

/// Total length of a route along its samples, in meters.
#[must_use]
pub fn route_distance_m(coordinates: &[Coordinate]) -> f64 {
    coordinates
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}

#[must_use]
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 0.0 {
        return "Unknown".to_string();
    }

    if meters < 1000.0 {
        format!("{meters:.0} m")
    } else if meters < 10_000.0 {
        format!("{:.1} km", meters / 1000.0)
    } else if meters < 100_000.0 {
        format!("{:.0} km", meters / 1000.0)
    } else {
        format!("{:.0} km", (meters / 1000.0).round())
    }
}

/// In-memory buffer for the tracking session of one job. Samples append in
/// delivery order; the buffer only leaves through [`RouteRecorder::finish`].
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRecorder {
    job_id: JobId,
    samples: Vec<Coordinate>,
}

impl RouteRecorder {
    #[must_use]
    pub fn start(job_id: JobId) -> Self {
        Self {
            job_id,
            samples: Vec::new(),
        }
    }

    pub fn record(&mut self, coordinate: Coordinate) {
        self.samples.push(coordinate);
    }

    #[must_use]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn last_position(&self) -> Option<&Coordinate> {
        self.samples.last()
    }

    #[must_use]
    pub fn distance_m(&self) -> f64 {
        route_distance_m(&self.samples)
    }

    /// Wall time covered so far, from the first sample to the last.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp.elapsed_since(first.timestamp),
            _ => 0,
        }
    }

    #[must_use]
    pub fn finish(self) -> (JobId, Vec<Coordinate>) {
        (self.job_id, self.samples)
    }
}

/// A route that failed remote submission, exactly as it was captured. The
/// client ref doubles as the `Idempotency-Key` so a retry of the same entry
/// cannot double-record on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRoute {
    pub client_ref: String,
    pub job_id: JobId,
    pub coordinates: Vec<Coordinate>,
}

impl PendingRoute {
    #[must_use]
    pub fn new(job_id: JobId, coordinates: Vec<Coordinate>) -> Self {
        Self {
            client_ref: Uuid::new_v4().to_string(),
            job_id,
            coordinates,
        }
    }
}

/// Ordered queue of unsent routes, persisted under the `unsavedRoutes` key
/// as a versioned JSON envelope. Oldest-first; bounded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteQueue {
    entries: VecDeque<PendingRoute>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RouteQueueEnvelope {
    version: u32,
    entries: Vec<PendingRoute>,
}

impl RouteQueue {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn front(&self) -> Option<&PendingRoute> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingRoute> {
        self.entries.iter()
    }

    /// Appends a failed submission. Past the cap the oldest entry is dropped
    /// to make room.
    pub fn push(&mut self, route: PendingRoute) {
        if self.entries.len() >= MAX_PENDING_ROUTES {
            if let Some(evicted) = self.entries.pop_front() {
                warn!(
                    client_ref = %evicted.client_ref,
                    job_id = %evicted.job_id,
                    "pending route queue full, evicting oldest entry"
                );
            }
        }
        self.entries.push_back(route);
    }

    /// Removes the entry with this client ref, wherever it sits in the queue.
    pub fn remove(&mut self, client_ref: &str) -> Option<PendingRoute> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.client_ref == client_ref)?;
        self.entries.remove(index)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let envelope = RouteQueueEnvelope {
            version: ROUTE_QUEUE_VERSION,
            entries: self.entries.iter().cloned().collect(),
        };
        serde_json::to_vec(&envelope)
    }

    /// Restores a queue from stored bytes. Undecodable input and unknown
    /// envelope versions yield an empty queue; the data loss is logged, not
    /// surfaced.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<RouteQueueEnvelope>(bytes) {
            Ok(envelope) if envelope.version == ROUTE_QUEUE_VERSION => Self {
                entries: envelope.entries.into(),
            },
            Ok(envelope) => {
                warn!(
                    version = envelope.version,
                    "unknown pending route envelope version, starting empty"
                );
                Self::default()
            }
            Err(err) => {
                warn!(error = %err, "could not decode stored pending routes, starting empty");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn coord(lat: f64, lon: f64, ts: u64) -> Coordinate {
        Coordinate::new(lat, lon, UnixTimeMs(ts)).unwrap()
    }

    #[test]
    fn test_valid_coordinates() {
        assert!(Coordinate::new(0.0, 0.0, UnixTimeMs(0)).is_ok());
        assert!(Coordinate::new(90.0, 180.0, UnixTimeMs(0)).is_ok());
        assert!(Coordinate::new(-90.0, -180.0, UnixTimeMs(0)).is_ok());
        assert!(Coordinate::new(51.5074, -0.1278, UnixTimeMs(0)).is_ok());
    }

    #[test]
    fn test_invalid_latitude() {
        assert!(matches!(
            Coordinate::new(91.0, 0.0, UnixTimeMs(0)),
            Err(CoordinateError::LatitudeOutOfRange(_))
        ));
        assert!(matches!(
            Coordinate::new(-91.0, 0.0, UnixTimeMs(0)),
            Err(CoordinateError::LatitudeOutOfRange(_))
        ));
    }

    #[test]
    fn test_invalid_longitude() {
        assert!(matches!(
            Coordinate::new(0.0, 181.0, UnixTimeMs(0)),
            Err(CoordinateError::LongitudeOutOfRange(_))
        ));
        assert!(matches!(
            Coordinate::new(0.0, -181.0, UnixTimeMs(0)),
            Err(CoordinateError::LongitudeOutOfRange(_))
        ));
    }

    #[test]
    fn test_non_finite_coordinates() {
        assert!(matches!(
            Coordinate::new(f64::NAN, 0.0, UnixTimeMs(0)),
            Err(CoordinateError::NonFinite)
        ));
        assert!(matches!(
            Coordinate::new(0.0, f64::INFINITY, UnixTimeMs(0)),
            Err(CoordinateError::NonFinite)
        ));
        assert!(matches!(
            Coordinate::new(f64::NEG_INFINITY, 0.0, UnixTimeMs(0)),
            Err(CoordinateError::NonFinite)
        ));
    }

    #[test]
    fn test_same_point_distance() {
        let p = coord(51.5074, -0.1278, 0);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_london_paris_distance() {
        let london = coord(51.5074, -0.1278, 0);
        let paris = coord(48.8566, 2.3522, 0);
        let distance = haversine_distance(&london, &paris);
        assert!((distance - 343_500.0).abs() < 10_000.0);
    }

    #[test]
    fn test_antipodal_distance() {
        let p1 = coord(0.0, 0.0, 0);
        let p2 = coord(0.0, 180.0, 0);
        let distance = haversine_distance(&p1, &p2);
        let expected = std::f64::consts::PI * EARTH_RADIUS_M;
        assert!((distance - expected).abs() < 1000.0);
    }

    #[test]
    fn test_route_distance_sums_legs() {
        let route = [
            coord(51.5074, -0.1278, 0),
            coord(51.5080, -0.1278, 1),
            coord(51.5090, -0.1278, 2),
        ];
        let total = route_distance_m(&route);
        let legs = haversine_distance(&route[0], &route[1])
            + haversine_distance(&route[1], &route[2]);
        assert!((total - legs).abs() < 1e-9);
        assert_eq!(route_distance_m(&route[..1]), 0.0);
        assert_eq!(route_distance_m(&[]), 0.0);
    }

    #[test]
    fn test_format_distance_meters() {
        assert_eq!(format_distance(0.0), "0 m");
        assert_eq!(format_distance(500.0), "500 m");
        assert_eq!(format_distance(999.0), "999 m");
    }

    #[test]
    fn test_format_distance_kilometers() {
        assert_eq!(format_distance(1000.0), "1.0 km");
        assert_eq!(format_distance(1500.0), "1.5 km");
        assert_eq!(format_distance(15000.0), "15 km");
        assert_eq!(format_distance(150_000.0), "150 km");
    }

    #[test]
    fn test_format_distance_invalid() {
        assert_eq!(format_distance(f64::NAN), "Unknown");
        assert_eq!(format_distance(f64::INFINITY), "Unknown");
        assert_eq!(format_distance(-100.0), "Unknown");
    }

    #[test]
    fn test_rfc3339_rendering() {
        assert_eq!(
            UnixTimeMs(0).to_rfc3339().unwrap(),
            "1970-01-01T00:00:00.000Z"
        );
        assert_eq!(
            UnixTimeMs(1_704_067_200_000).to_rfc3339().unwrap(),
            "2024-01-01T00:00:00.000Z"
        );
        assert!(UnixTimeMs(u64::MAX).to_rfc3339().is_none());
    }

    #[test]
    fn test_recorder_preserves_arrival_order() {
        let mut recorder = RouteRecorder::start(JobId(7));
        recorder.record(coord(1.0, 1.0, 100));
        recorder.record(coord(2.0, 2.0, 200));
        recorder.record(coord(3.0, 3.0, 300));

        assert_eq!(recorder.sample_count(), 3);
        assert_eq!(recorder.duration_ms(), 200);
        assert_eq!(recorder.last_position().unwrap().latitude(), 3.0);

        let (job_id, samples) = recorder.finish();
        assert_eq!(job_id, JobId(7));
        let timestamps: Vec<u64> = samples.iter().map(|c| c.timestamp().as_millis()).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[test]
    fn test_empty_recorder() {
        let recorder = RouteRecorder::start(JobId(1));
        assert!(recorder.is_empty());
        assert_eq!(recorder.duration_ms(), 0);
        assert_eq!(recorder.distance_m(), 0.0);
        assert!(recorder.last_position().is_none());
    }

    #[test]
    fn test_queue_evicts_oldest_at_cap() {
        let mut queue = RouteQueue::default();
        for i in 0..MAX_PENDING_ROUTES {
            queue.push(PendingRoute::new(JobId(i as u64), vec![]));
        }
        assert_eq!(queue.len(), MAX_PENDING_ROUTES);

        queue.push(PendingRoute::new(JobId(9999), vec![]));
        assert_eq!(queue.len(), MAX_PENDING_ROUTES);
        assert_eq!(queue.front().unwrap().job_id, JobId(1));
        assert_eq!(queue.iter().last().unwrap().job_id, JobId(9999));
    }

    #[test]
    fn test_queue_removes_exact_entry() {
        let mut queue = RouteQueue::default();
        let first = PendingRoute::new(JobId(1), vec![]);
        let second = PendingRoute::new(JobId(2), vec![]);
        let third = PendingRoute::new(JobId(3), vec![]);
        queue.push(first.clone());
        queue.push(second.clone());
        queue.push(third.clone());

        let removed = queue.remove(&second.client_ref).unwrap();
        assert_eq!(removed, second);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front().unwrap().client_ref, first.client_ref);
        assert!(queue.remove("no-such-ref").is_none());
    }

    #[test]
    fn test_envelope_survives_storage() {
        let mut queue = RouteQueue::default();
        queue.push(PendingRoute::new(
            JobId(5),
            vec![coord(51.5, -0.12, 1000), coord(51.6, -0.13, 6000)],
        ));
        queue.push(PendingRoute::new(JobId(6), vec![]));

        let bytes = queue.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["version"], ROUTE_QUEUE_VERSION);
        assert_eq!(value["entries"].as_array().unwrap().len(), 2);

        let restored = RouteQueue::decode(&bytes);
        assert_eq!(restored, queue);
        assert_eq!(restored.front().unwrap().job_id, JobId(5));
    }

    #[test]
    fn test_decode_garbage_yields_empty_queue() {
        assert!(RouteQueue::decode(b"not json").is_empty());
        assert!(RouteQueue::decode(b"").is_empty());
        assert!(RouteQueue::decode(br#"{"version": 99, "entries": []}"#).is_empty());
    }

    proptest! {
        #[test]
        fn coordinate_validation_never_panics(
            lat in proptest::num::f64::ANY,
            lon in proptest::num::f64::ANY,
            ts in proptest::num::u64::ANY,
        ) {
            let result = Coordinate::new(lat, lon, UnixTimeMs(ts));
            if let Ok(c) = result {
                prop_assert!(c.latitude().is_finite());
                prop_assert!((-90.0..=90.0).contains(&c.latitude()));
                prop_assert!((-180.0..=180.0).contains(&c.longitude()));
            }
        }

        #[test]
        fn haversine_is_symmetric_and_nonnegative(
            lat1 in -90.0f64..90.0,
            lon1 in -180.0f64..180.0,
            lat2 in -90.0f64..90.0,
            lon2 in -180.0f64..180.0,
        ) {
            let a = coord(lat1, lon1, 0);
            let b = coord(lat2, lon2, 0);
            let forward = haversine_distance(&a, &b);
            let back = haversine_distance(&b, &a);
            prop_assert!(forward >= 0.0);
            prop_assert!((forward - back).abs() < 1e-6);
        }

        #[test]
        fn queue_never_exceeds_cap_and_keeps_order(count in 1usize..300) {
            let mut queue = RouteQueue::default();
            for i in 0..count {
                queue.push(PendingRoute::new(JobId(i as u64), vec![]));
            }
            prop_assert!(queue.len() <= MAX_PENDING_ROUTES);

            let ids: Vec<u64> = queue.iter().map(|e| e.job_id.value()).collect();
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            prop_assert_eq!(&ids, &sorted);
            prop_assert_eq!(ids.last().copied(), Some(count as u64 - 1));
        }
    }
}
