use std::{cell::RefCell, io::Cursor, rc::Rc};

use teatro::{
    EditEvent, FsSpriteProvider, LayerConfig, NullSink, Scene, SceneOrigin, ScreenSize,
    camera::{ZOOM_MAX, ZOOM_MIN},
    core::Point,
    theatre::Theatre,
};

fn temp_dir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "teatro_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn write_sprite(root: &std::path::Path, name: &str, w: u32, h: u32) {
    let dir = root.join(format!("users/default/sprites/{name}"));
    std::fs::create_dir_all(&dir).unwrap();
    let img = image::RgbaImage::from_pixel(w, h, image::Rgba([200, 100, 50, 255]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    std::fs::write(dir.join(format!("{name}.png")), &buf).unwrap();
}

fn screen() -> ScreenSize {
    ScreenSize::new(1280, 720).unwrap()
}

fn theatre(
    root: &std::path::Path,
    layers: Vec<LayerConfig>,
) -> Theatre<FsSpriteProvider, NullSink> {
    let mut t = Theatre::new(
        Scene {
            name: "stage".to_string(),
            duration_sec: Some(60.0),
            layers,
            sounds: vec![],
            origin: SceneOrigin::Default,
        },
        screen(),
        FsSpriteProvider::new(root),
        NullSink,
    )
    .unwrap();
    t.initialize().unwrap();
    t
}

fn boat_config() -> LayerConfig {
    let mut cfg = LayerConfig::new("boat");
    cfg.x_offset = 100.0;
    cfg.y_offset = 100.0;
    cfg
}

#[test]
fn dragging_a_sprite_commits_a_position_edit() {
    let tmp = temp_dir("drag_commit");
    write_sprite(&tmp, "boat", 64, 32);
    let mut t = theatre(&tmp, vec![boat_config()]);
    t.set_time(2.5);

    // The sprite sits at its offsets with no scroll contribution.
    let p = t.layer("boat").unwrap().placement().unwrap();
    assert_eq!((p.base_x, p.base_y), (0.0, 100.0));

    let grab = Point::new(p.x + p.width / 2.0, p.y + p.height / 2.0);
    t.handle_canvas_click(grab.x, grab.y, false);
    assert_eq!(t.selection.primary(), Some("boat"));

    assert!(t.handle_drag_start(grab.x, grab.y));
    t.handle_drag_move(grab.x + 100.0, grab.y);
    let ev = t.handle_drag_end().unwrap();

    // x_offset was 100 plus scroll_speed 0 * scroll; moving 100 right
    // lands it at 200 and the commit carries the scene time.
    assert_eq!(
        ev,
        EditEvent::PositionChanged {
            sprite_name: "boat".to_string(),
            x_offset: 200.0,
            y_offset: 100.0,
            time: 2.5,
        }
    );

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn clicks_route_through_the_camera_transform() {
    let tmp = temp_dir("camera_click");
    write_sprite(&tmp, "boat", 64, 32);
    let mut t = theatre(&tmp, vec![boat_config()]);
    t.set_time(0.0);

    t.camera.set_zoom(2.0, None, None).unwrap();
    t.camera.set_pan(40.0, -25.0).unwrap();

    let p = t.layer("boat").unwrap().placement().unwrap();
    let world = Point::new(p.x + 3.0, p.y + 3.0);
    let on_screen = t.camera.world_to_screen(screen()) * world;

    t.handle_canvas_click(on_screen.x, on_screen.y, false);
    assert_eq!(t.selection.primary(), Some("boat"));

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn empty_space_clears_selection_and_notifies_once() {
    let tmp = temp_dir("deselect");
    write_sprite(&tmp, "boat", 64, 32);
    let mut t = theatre(&tmp, vec![boat_config()]);
    t.set_time(0.0);

    let seen: Rc<RefCell<Vec<Option<String>>>> = Rc::new(RefCell::new(Vec::new()));
    let seen2 = seen.clone();
    t.events.on_sprite_selected = Some(Box::new(move |name| {
        seen2.borrow_mut().push(name.map(str::to_string));
    }));

    let p = t.layer("boat").unwrap().placement().unwrap();
    t.handle_canvas_click(p.x + 5.0, p.y + 5.0, false);
    t.handle_canvas_click(1200.0, 10.0, false);

    assert_eq!(t.selection.primary(), None);
    assert_eq!(
        *seen.borrow(),
        vec![Some("boat".to_string()), None]
    );

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn multi_select_toggles_membership() {
    let tmp = temp_dir("multi");
    write_sprite(&tmp, "boat", 64, 32);
    let mut other = LayerConfig::new("gull");
    other.x_offset = 400.0;
    other.y_offset = 100.0;
    write_sprite(&tmp, "gull", 64, 32);

    let mut t = theatre(&tmp, vec![boat_config(), other]);
    t.set_time(0.0);

    t.handle_canvas_click(105.0, 105.0, false);
    t.handle_canvas_click(405.0, 105.0, true);
    assert!(t.selection.is_selected("boat"));
    assert!(t.selection.is_selected("gull"));

    t.handle_canvas_click(405.0, 105.0, true);
    assert!(!t.selection.is_selected("gull"));
    assert_eq!(t.selection.primary(), Some("boat"));

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn camera_rejects_garbage_and_clamps_zoom() {
    let tmp = temp_dir("camera_guard");
    write_sprite(&tmp, "boat", 64, 32);
    let mut t = theatre(&tmp, vec![boat_config()]);

    assert!(t.camera.set_zoom(f64::NAN, None, None).is_err());
    assert!(t.camera.set_zoom(-3.0, None, None).is_err());
    assert_eq!(t.camera.zoom(), 1.0);

    t.camera.set_zoom(1000.0, None, None).unwrap();
    assert_eq!(t.camera.zoom(), ZOOM_MAX);
    t.camera.set_zoom(1e-9, None, None).unwrap();
    assert_eq!(t.camera.zoom(), ZOOM_MIN);

    assert!(t.camera.set_pan(f64::INFINITY, 0.0).is_err());

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn camera_stays_bounded_across_a_mutation_storm() {
    let tmp = temp_dir("camera_storm");
    write_sprite(&tmp, "boat", 64, 32);
    let mut t = theatre(&tmp, vec![boat_config()]);

    // A grab bag of valid and invalid mutations, deterministic sequence.
    for i in 0..200u32 {
        let f = f64::from(i);
        match i % 7 {
            0 => {
                let _ = t.camera.set_zoom(f * 0.37 - 10.0, None, None);
            }
            1 => {
                let _ = t
                    .camera
                    .set_zoom(2.0, Some(Point::new(f, f * 0.5)), Some(screen()));
            }
            2 => t.camera.pan_by(f.sin() * 40.0, f.cos() * 40.0),
            3 => t.camera.pan_by(f64::NAN, 3.0),
            4 => {
                let _ = t.camera.set_pan(f * 2.0, -f);
            }
            5 => {
                let _ = t.camera.set_zoom(f64::NAN, None, None);
            }
            _ => t.camera.reset(),
        }

        let zoom = t.camera.zoom();
        let (px, py) = t.camera.pan();
        assert!((ZOOM_MIN..=ZOOM_MAX).contains(&zoom), "zoom {zoom} at step {i}");
        assert!(px.is_finite() && py.is_finite(), "pan ({px}, {py}) at step {i}");
    }

    std::fs::remove_dir_all(&tmp).ok();
}

#[test]
fn cancelled_drag_leaves_the_config_edit_uncommitted() {
    let tmp = temp_dir("drag_cancel");
    write_sprite(&tmp, "boat", 64, 32);
    let mut t = theatre(&tmp, vec![boat_config()]);
    t.set_time(0.0);

    let p = t.layer("boat").unwrap().placement().unwrap();
    let grab = Point::new(p.x + p.width / 2.0, p.y + p.height / 2.0);
    t.handle_canvas_click(grab.x, grab.y, false);
    assert!(t.handle_drag_start(grab.x, grab.y));
    t.handle_drag_move(grab.x + 50.0, grab.y);
    t.cancel_drag();
    assert!(t.handle_drag_end().is_none());

    std::fs::remove_dir_all(&tmp).ok();
}
