use indicatif::ProgressBar;
use real3d_cli::commands::{render, write_config, Dumps, RenderOptions};

fn options(frames: u32, threaded: bool) -> RenderOptions {
    RenderOptions {
        config: None,
        step: Some("21".into()),
        frames,
        gpu: false,
        png: None,
        threaded: Some(threaded),
    }
}

#[test]
fn empty_dumps_render_on_the_calling_thread() {
    let pb = ProgressBar::hidden();
    let stats = render(&Dumps::default(), &options(2, false), &pb).unwrap();
    assert_eq!(pb.position(), 2);
    assert_eq!(stats.display_nodes, 0);
    assert_eq!(stats.recaches, 0);
}

#[test]
fn empty_dumps_render_on_a_worker_thread() {
    let pb = ProgressBar::hidden();
    let stats = render(&Dumps::default(), &options(3, true), &pb).unwrap();
    assert_eq!(pb.position(), 3);
    assert_eq!(stats.display_nodes, 0);
}

#[test]
fn config_is_not_overwritten() {
    let path = std::env::temp_dir().join(format!("real3d-config-{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);
    write_config(&path).unwrap();
    assert!(write_config(&path).is_err());
    std::fs::remove_file(&path).unwrap();
}
