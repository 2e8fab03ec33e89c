//! In-memory stand-in for the sandbox page: a container, the document body
//! and the surfaces programs attach to either of them.

use crate::host::Status;
use crate::protocol::ParameterSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Container,
    /// Attached to the document body, the way some libraries do by default.
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Matched by the surface selector.
    Canvas,
    /// Plain elements such as a chart's `<div>`; never selected as a surface.
    Markup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    pub id: SurfaceId,
    pub kind: SurfaceKind,
    pub placement: Placement,
    pub visible: bool,
    /// Generation of the session whose render created it.
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Render,
    Update,
}

/// One call into generated code.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub kind: InvocationKind,
    pub generation: u64,
    pub params: ParameterSet,
}

#[derive(Debug, Default)]
pub struct Document {
    next_surface: u64,
    /// Document order.
    surfaces: Vec<Surface>,
    status: Option<Status>,
    invocations: Vec<Invocation>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_surface(&mut self, placement: Placement, generation: u64) -> SurfaceId {
        self.insert(SurfaceKind::Canvas, placement, generation)
    }

    /// Appends a plain element to the container.
    pub fn create_markup(&mut self, generation: u64) -> SurfaceId {
        self.insert(SurfaceKind::Markup, Placement::Container, generation)
    }

    fn insert(&mut self, kind: SurfaceKind, placement: Placement, generation: u64) -> SurfaceId {
        let id = SurfaceId(self.next_surface);
        self.next_surface += 1;
        self.surfaces.push(Surface {
            id,
            kind,
            placement,
            visible: placement == Placement::Container,
            generation,
        });
        id
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.iter().find(|surface| surface.id == id)
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn container_surfaces(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces
            .iter()
            .filter(|surface| surface.placement == Placement::Container)
    }

    /// Surfaces inside the container that are shown.
    pub fn active_surfaces(&self) -> usize {
        self.container_surfaces().filter(|surface| surface.visible).count()
    }

    /// Re-parents `id` as the container's last child and shows it.
    pub fn move_into_container(&mut self, id: SurfaceId) {
        if let Some(position) = self.surfaces.iter().position(|surface| surface.id == id) {
            let mut surface = self.surfaces.remove(position);
            surface.placement = Placement::Container;
            surface.visible = true;
            self.surfaces.push(surface);
        }
    }

    pub fn remove_surface(&mut self, id: SurfaceId) {
        self.surfaces.retain(|surface| surface.id != id);
    }

    /// Removes every canvas in the container except `keep`; returns how many went.
    pub fn keep_only(&mut self, keep: SurfaceId) -> usize {
        let before = self.surfaces.len();
        self.surfaces.retain(|surface| {
            surface.placement != Placement::Container
                || surface.kind != SurfaceKind::Canvas
                || surface.id == keep
        });
        before - self.surfaces.len()
    }

    pub fn latest_container_surface(&self) -> Option<SurfaceId> {
        self.container_surfaces()
            .filter(|surface| surface.kind == SurfaceKind::Canvas)
            .last()
            .map(|surface| surface.id)
    }

    /// Empties the container. Surfaces attached elsewhere stay.
    pub fn clear_container(&mut self) {
        self.surfaces
            .retain(|surface| surface.placement != Placement::Container);
        self.status = None;
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = Some(status);
    }

    pub fn clear_status(&mut self) {
        self.status = None;
    }

    pub fn record(&mut self, kind: InvocationKind, generation: u64, params: &ParameterSet) {
        self.invocations.push(Invocation {
            kind,
            generation,
            params: params.clone(),
        });
    }

    pub fn invocations(&self) -> &[Invocation] {
        &self.invocations
    }
}
