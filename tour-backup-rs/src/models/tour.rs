use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Tour ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tour {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Floor {
    pub id: String,
    pub tour_id: String,
    pub name: String,
    pub display_order: i64,
    pub image_path: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub floor_id: String,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub point_id: String,
    pub image_path: String,
    pub capture_date: Option<String>,
    pub display_order: i64,
    pub created_at: String,
}

// ── Hierarchical tree (floors → points → photos) ──

#[derive(Debug, Clone, Serialize)]
pub struct TourTree {
    pub tour: Tour,
    pub floors: Vec<FloorNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FloorNode {
    pub floor: Floor,
    pub points: Vec<PointNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointNode {
    pub point: Point,
    pub photos: Vec<Photo>,
}

fn row_to_tour(row: &Row) -> rusqlite::Result<Tour> {
    Ok(Tour {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_floor(row: &Row) -> rusqlite::Result<Floor> {
    Ok(Floor {
        id: row.get("id")?,
        tour_id: row.get("tour_id")?,
        name: row.get("name")?,
        display_order: row.get("display_order")?,
        image_path: row.get("image_path")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_point(row: &Row) -> rusqlite::Result<Point> {
    Ok(Point {
        id: row.get("id")?,
        floor_id: row.get("floor_id")?,
        title: row.get("title")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_photo(row: &Row) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get("id")?,
        point_id: row.get("point_id")?,
        image_path: row.get("image_path")?,
        capture_date: row.get("capture_date")?,
        display_order: row.get("display_order")?,
        created_at: row.get("created_at")?,
    })
}

pub fn find_all(conn: &Connection) -> anyhow::Result<Vec<Tour>> {
    let mut stmt = conn.prepare("SELECT * FROM tours ORDER BY created_at DESC")?;
    let rows = stmt.query_map([], row_to_tour)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn find_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Tour>> {
    let mut stmt = conn.prepare("SELECT * FROM tours WHERE id = ?")?;
    let mut rows = stmt.query_map(params![id], row_to_tour)?;
    Ok(rows.next().and_then(|r| r.ok()))
}

/// Load the full tour hierarchy. Floors come back in their configured
/// order, points alphabetically by title, and photos chronologically with
/// undated photos last. This is the same order the archive layout uses.
pub fn find_tree(conn: &Connection, tour_id: &str) -> anyhow::Result<Option<TourTree>> {
    let Some(tour) = find_by_id(conn, tour_id)? else {
        return Ok(None);
    };

    let mut floor_stmt =
        conn.prepare("SELECT * FROM floors WHERE tour_id = ? ORDER BY display_order, name")?;
    let floors: Vec<Floor> = floor_stmt
        .query_map(params![tour_id], row_to_floor)?
        .filter_map(|r| r.ok())
        .collect();

    let mut point_stmt = conn.prepare("SELECT * FROM points WHERE floor_id = ? ORDER BY title")?;
    let mut photo_stmt = conn.prepare(
        "SELECT * FROM photos WHERE point_id = ?
         ORDER BY capture_date IS NULL, capture_date, display_order",
    )?;

    let mut floor_nodes = Vec::with_capacity(floors.len());
    for floor in floors {
        let points: Vec<Point> = point_stmt
            .query_map(params![floor.id], row_to_point)?
            .filter_map(|r| r.ok())
            .collect();

        let mut point_nodes = Vec::with_capacity(points.len());
        for point in points {
            let photos: Vec<Photo> = photo_stmt
                .query_map(params![point.id], row_to_photo)?
                .filter_map(|r| r.ok())
                .collect();
            point_nodes.push(PointNode { point, photos });
        }
        floor_nodes.push(FloorNode {
            floor,
            points: point_nodes,
        });
    }

    Ok(Some(TourTree {
        tour,
        floors: floor_nodes,
    }))
}

// ── Creation (nested request used by the seed route and tests) ──

#[derive(Debug, Deserialize)]
pub struct CreateTourRequest {
    pub owner_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub floors: Vec<CreateFloorRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CreateFloorRequest {
    pub name: String,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub points: Vec<CreatePointRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePointRequest {
    pub title: String,
    #[serde(default)]
    pub photos: Vec<CreatePhotoRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePhotoRequest {
    pub image_path: String,
    #[serde(default)]
    pub capture_date: Option<String>,
    #[serde(default)]
    pub display_order: i64,
}

pub fn create(conn: &Connection, data: &CreateTourRequest) -> anyhow::Result<Tour> {
    let tour_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO tours (id, owner_id, title, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![tour_id, data.owner_id, data.title, data.description, now, now],
    )?;

    for floor in &data.floors {
        let floor_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO floors (id, tour_id, name, display_order, image_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![floor_id, tour_id, floor.name, floor.display_order, floor.image_path, now],
        )?;

        for point in &floor.points {
            let point_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO points (id, floor_id, title, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![point_id, floor_id, point.title, now],
            )?;

            for photo in &point.photos {
                conn.execute(
                    "INSERT INTO photos (id, point_id, image_path, capture_date, display_order, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        Uuid::new_v4().to_string(),
                        point_id,
                        photo.image_path,
                        photo.capture_date,
                        photo.display_order,
                        now,
                    ],
                )?;
            }
        }
    }

    find_by_id(conn, &tour_id)?.ok_or_else(|| anyhow::anyhow!("Failed to retrieve created tour"))
}
