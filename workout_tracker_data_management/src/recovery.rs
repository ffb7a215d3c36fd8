use workout_tracker_lib::{geo::haversine_distance, track_point::PersistedPoint, track_session::PersistedSession};

/// Everything needed to put an interrupted session back into a paused session state.
#[derive(Debug, Clone)]
pub struct RecoveredSession {
    pub session: PersistedSession,
    /// Segments `0..=max_segment_index`, each ordered by timestamp. A segment index that never
    /// received a point comes back as an empty segment so indexes keep lining up with storage.
    pub segments: Vec<Vec<PersistedPoint>>,
    pub last_point: PersistedPoint,
    /// The sequence number the next enqueued point should get.
    pub next_sequence: i64,
}

impl RecoveredSession {
    pub fn point_count(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }
}

/// Merges stored points with buffer file points. Points are identified by their sequence number;
/// the stored copy wins.
pub fn merge_points(mut stored: Vec<PersistedPoint>, buffered: Vec<PersistedPoint>) -> (Vec<PersistedPoint>, Vec<PersistedPoint>) {
    let known: std::collections::HashSet<i64> = stored.iter().map(|p| p.sequence).collect();
    let missing: Vec<PersistedPoint> = buffered.into_iter()
        .filter(|p| !known.contains(&p.sequence))
        .collect();

    stored.extend(missing.iter().cloned());
    (stored, missing)
}

pub fn group_into_segments(points: Vec<PersistedPoint>) -> Vec<Vec<PersistedPoint>> {
    let Some(max_index) = points.iter().map(|p| p.segment_index).max() else {
        return Vec::new();
    };

    let mut segments: Vec<Vec<PersistedPoint>> = vec![Vec::new(); max_index as usize + 1];
    for point in points {
        segments[point.segment_index as usize].push(point);
    }

    for segment in segments.iter_mut() {
        segment.sort_by_key(|p| (p.timestamp_millis, p.sequence));
    }

    segments
}

/// Length of the recovered path. Never measured across segment boundaries.
pub fn path_distance(segments: &[Vec<PersistedPoint>]) -> f64 {
    segments.iter()
        .flat_map(|segment| segment.windows(2))
        .map(|pair| haversine_distance((pair[0].latitude, pair[0].longitude), (pair[1].latitude, pair[1].longitude)))
        .sum()
}

/// Builds the recovered session, or `None` when there is nothing worth resuming.
///
/// The stored distance is only as fresh as the last stats write, so it is raised to the length of
/// the recovered path when the points show more.
pub fn rebuild(mut session: PersistedSession, points: Vec<PersistedPoint>) -> Option<RecoveredSession> {
    let next_sequence = points.iter().map(|p| p.sequence).max()? + 1;
    let segments = group_into_segments(points);
    let last_point = segments.iter().rev().find_map(|segment| segment.last()).cloned()?;

    let walked = path_distance(&segments);
    if walked > session.total_distance_meters {
        tracing::debug!(stored = session.total_distance_meters, walked, "Distance taken from recovered path");
        session.total_distance_meters = walked;
    }

    Some(RecoveredSession {
        session,
        segments,
        last_point,
        next_sequence,
    })
}
