//! ember demo application.
//!
//! Opens a window, renders a small hierarchy of spinning cubes when mesh
//! shaders are provided and otherwise just clears the screen. Any error out
//! of the renderer is fatal: it is logged, the event loop stops and the
//! process exits with a non-zero status.

mod args;

use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Parser;
use glam::{Mat4, Quat, Vec3};
use tracing::{error, info, warn};
use winit::event_loop::ControlFlow;

use ember_core::{FrameTimer, RendererConfig};
use ember_platform::{ActiveEventLoop, ApplicationHandler, EventLoop, Window, WindowEvent, WindowId};
use ember_renderer::{MeshData, MeshHandle, PassKind, Renderer};
use ember_scene::{NodeId, SceneGraph, Transform};

use crate::args::Args;

const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Demo scene: a root cube with two orbiting children.
struct DemoScene {
    graph: SceneGraph,
    root: NodeId,
    orbiters: Vec<NodeId>,
    cube: MeshHandle,
}

impl DemoScene {
    fn new(cube: MeshHandle) -> Result<Self> {
        let mut graph = SceneGraph::new();
        let root = graph.add_root("root", Transform::new());
        let mut orbiters = Vec::new();
        for (name, x) in [("left", -2.0), ("right", 2.0)] {
            let local = Transform::new()
                .with_position(Vec3::new(x, 0.0, 0.0))
                .with_scale(Vec3::splat(0.5));
            orbiters.push(graph.add_child(root, name, local)?);
        }
        Ok(Self {
            graph,
            root,
            orbiters,
            cube,
        })
    }

    fn update(&mut self, seconds: f32) {
        if let Some(root) = self.graph.local_mut(self.root) {
            root.rotation = Quat::from_rotation_y(seconds * 0.5);
        }
        for (i, &node) in self.orbiters.iter().enumerate() {
            if let Some(local) = self.graph.local_mut(node) {
                local.rotation = Quat::from_rotation_x(seconds * (1.0 + i as f32));
            }
        }
        self.graph.update_world_transforms();
    }
}

struct App {
    args: Args,
    config: RendererConfig,
    window: Option<Window>,
    renderer: Option<Renderer>,
    scene: Option<DemoScene>,
    timer: FrameTimer,
    frames_rendered: u64,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(args: Args, config: RendererConfig) -> Self {
        Self {
            args,
            config,
            window: None,
            renderer: None,
            scene: None,
            timer: FrameTimer::new(FPS_REPORT_INTERVAL),
            frames_rendered: 0,
            fatal: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window)?;
        let mut renderer = Renderer::new(&window, &self.config)?;

        if let Some((vert, frag)) = self.args.shader_paths() {
            renderer.load_materials(&vert, &frag)?;
            let cube = renderer.upload_mesh(&MeshData::cube())?;
            self.scene = Some(DemoScene::new(cube)?);
        } else {
            warn!("No --shader-dir given, rendering the clear color only");
        }

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(window), Some(renderer)) = (&self.window, &mut self.renderer) else {
            return Ok(());
        };
        if window.is_minimized() {
            return Ok(());
        }

        let seconds = self.timer.elapsed().as_secs_f32();
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 6.0), Vec3::ZERO, Vec3::Y);
        // Reverse-Z: near and far swapped. Y flipped for Vulkan clip space.
        let mut proj = Mat4::perspective_rh(
            70.0_f32.to_radians(),
            renderer.aspect_ratio(),
            100.0,
            0.1,
        );
        proj.y_axis.y *= -1.0;
        renderer.set_camera(view, proj);

        if let Some(scene) = self.scene.as_mut() {
            scene.update(seconds);
        }
        let scene = self.scene.as_ref();

        let rendered = renderer.render_frame(|frame| {
            let Some(scene) = scene else {
                return Ok(());
            };
            let Some(material) = frame.default_material(PassKind::Opaque) else {
                return Ok(());
            };
            frame.draw_node(&scene.graph, scene.root, scene.cube, material)?;
            for &node in &scene.orbiters {
                frame.draw_node(&scene.graph, node, scene.cube, material)?;
            }
            Ok(())
        })?;

        if rendered {
            self.frames_rendered += 1;
            self.timer.tick();
            if let Some(stats) = self.timer.take_report() {
                info!(
                    "{:.1} fps ({:.2} ms/frame), {} draws",
                    stats.fps(),
                    stats.average_frame_time.as_secs_f64() * 1000.0,
                    renderer.last_stats().draws
                );
            }
        }
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("Fatal: {:#}", err);
        self.fatal = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init(event_loop)
        {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.redraw() {
                    self.fail(event_loop, e);
                    return;
                }
                if let Some(max) = self.args.max_frames
                    && self.frames_rendered >= max
                {
                    info!("Rendered {} frames, exiting", self.frames_rendered);
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Renderer before window: the surface must go before its window.
        self.renderer = None;
        self.window = None;
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    match args.log_filter.as_deref() {
        Some(filter) => ember_core::init_logging_with_filter(filter),
        None => ember_core::init_logging(),
    }

    let config = args.to_config();
    config.validate()?;
    info!("Starting ember ({}x{})", config.window.width, config.window.height);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(args, config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(err) => Err(anyhow!("renderer terminated: {err:#}")),
        None => Ok(()),
    }
}
