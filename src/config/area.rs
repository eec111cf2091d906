use mapforge_core::{ChunkCoord, Rect};

/// Parses the `area` setting: either `"full"` or a comma separated list of chunks `x.z` and inclusive ranges
/// `x.z-x2.z2`.
pub fn parse_area(area: &str, map_size_x: i32, map_size_z: i32) -> Result<Vec<Rect>, String> {
    let area = area.trim();
    if area == "full" {
        return Ok(Rect::new(0, 0, map_size_x, map_size_z).into_iter().collect());
    }

    let mut rects = Vec::new();
    for part in area.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let rect = match split_range(part) {
            Some((a, b)) => Rect::from_corners(parse_coord(a)?, parse_coord(b)?),
            None => Rect::single(parse_coord(part)?),
        };
        rects.push(rect);
    }
    if rects.is_empty() {
        return Err("no chunks".into());
    }
    Ok(rects)
}

/// Splits at the first `-` that follows a digit, so `-1.-2--3.4` is a range but `-1.-2` is a single chunk.
fn split_range(part: &str) -> Option<(&str, &str)> {
    let mut prev = None;
    for (i, c) in part.char_indices() {
        if c == '-' && prev.map_or(false, |p: char| p.is_ascii_digit()) {
            return Some((&part[..i], &part[i + 1..]));
        }
        if !c.is_whitespace() {
            prev = Some(c);
        }
    }
    None
}

fn parse_coord(s: &str) -> Result<ChunkCoord, String> {
    let s = s.trim();
    let (x, z) = s
        .split_once('.')
        .ok_or_else(|| format!("expected x.z, got {s:?}"))?;
    let x = x.parse().map_err(|e| format!("bad x in {s:?}: {e}"))?;
    let z = z.parse().map_err(|e| format!("bad z in {s:?}: {e}"))?;
    Ok(ChunkCoord::new(x, z))
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
