use std::sync::Arc;

use gpui::{
    AnyElement, App, AppContext, Context, IntoElement, ObjectFit, ParentElement, Render,
    RenderImage, Styled, StyledImage, TitlebarOptions, Window, WindowDecorations, WindowOptions,
    div, img,
};
use gpui_component::{Root, h_flex, v_flex};

use crate::session::Session;

mod render_util;

use render_util::output_to_image;

/// Opens the preview window. The session lives as long as the window.
pub fn launch_ui(app: &mut App, session: Session, camera_label: String) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some(format!("Avatar Stream - {}", session.avatar()).into()),
            appears_transparent: true,
            traffic_light_position: None,
        }),
        window_decorations: Some(WindowDecorations::Client),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| PreviewView::new(session, camera_label));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

struct PreviewView {
    session: Session,
    camera_label: String,
    latest_image: Option<Arc<RenderImage>>,
    latest_size: Option<(u32, u32)>,
    latest_sequence: u64,
}

impl PreviewView {
    fn new(session: Session, camera_label: String) -> Self {
        Self {
            session,
            camera_label,
            latest_image: None,
            latest_size: None,
            latest_sequence: 0,
        }
    }

    fn poll_output(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        let mut newest = None;
        while let Ok(frame) = self.session.output().try_recv() {
            newest = Some(frame);
        }
        let Some(frame) = newest else {
            return;
        };

        if let Some(image) = output_to_image(&frame) {
            if let Some(old_image) = self.latest_image.replace(image) {
                // The sprite atlas keeps every texture until it is dropped explicitly.
                cx.drop_image(old_image, Some(window));
            }
        }
        self.latest_size = Some((frame.width, frame.height));
        self.latest_sequence = frame.sequence;
    }

    fn status_text(&self) -> String {
        let state = if self.session.is_running() {
            "running"
        } else {
            "stopped"
        };
        match self.latest_size {
            Some((w, h)) => format!(
                "{} | {} | {w}x{h} #{} | {state}",
                self.session.avatar(),
                self.camera_label,
                self.latest_sequence
            ),
            None => format!(
                "{} | {} | waiting for frames | {state}",
                self.session.avatar(),
                self.camera_label
            ),
        }
    }
}

impl Render for PreviewView {
    fn render(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) -> impl IntoElement {
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });
        self.poll_output(window, cx);

        let stage: AnyElement = match &self.latest_image {
            Some(image) => img(image.clone())
                .size_full()
                .object_fit(ObjectFit::Contain)
                .into_any_element(),
            None => div()
                .size_full()
                .flex()
                .items_center()
                .justify_center()
                .text_sm()
                .text_color(gpui::rgb(0x8b95a5))
                .child("Waiting for the camera...")
                .into_any_element(),
        };

        v_flex()
            .size_full()
            .bg(gpui::rgb(0x0f1419))
            .child(
                h_flex()
                    .h(gpui::px(32.0))
                    .w_full()
                    .pl(gpui::px(80.0))
                    .items_center()
                    .bg(gpui::rgb(0x1a2332))
                    .text_xs()
                    .text_color(gpui::rgb(0xa0aab8))
                    .child(self.status_text()),
            )
            .child(div().flex_1().w_full().overflow_hidden().child(stage))
    }
}
