//! Binds one notebook document to a kernel session.
//!
//! The binding owns the document, the session context, the cell tracker and
//! the command registry. Changing the kernel rebuilds the completion
//! coordinator and the kernel-bound commands once the new kernel has been
//! adopted. A change that was superseded while in flight leaves no trace.

use crate::cell::{CellKind, SerializedCell, SerializedNotebook};
use crate::commands::{command_ids, Command, CommandArgs, CommandRegistry};
use crate::completion::CompletionCoordinator;
use crate::document::NotebookDocument;
use crate::editor::{CellEditor, EditorFactory};
use crate::error::{NotebookError, Result};
use crate::kernel::KernelProvider;
use crate::lock;
use crate::outputs::{interpret, OutputEvent};
use crate::session::{Generation, GenerationCounter, KernelStatus, SessionContext};
use crate::settings::NotebookSettings;
use crate::tracker::CellTracker;
use jupyter_protocol::ExecuteRequest;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};

/// Everything a host supplies when opening a notebook.
#[derive(Default)]
pub struct BindingOptions {
    pub model: Option<SerializedNotebook>,
    pub kernel: Option<Arc<dyn KernelProvider>>,
    pub editor_factory: Option<Arc<dyn EditorFactory>>,
    pub settings: NotebookSettings,
}

pub struct KernelSessionBinding {
    document: Arc<Mutex<NotebookDocument>>,
    session: Arc<SessionContext>,
    tracker: Arc<CellTracker>,
    commands: Arc<CommandRegistry>,
    settings: NotebookSettings,
    editor_factory: Option<Arc<dyn EditorFactory>>,
    editors: Mutex<HashMap<String, Arc<dyn CellEditor>>>,
    generations: GenerationCounter,
    kernel: Mutex<Option<Arc<dyn KernelProvider>>>,
    completion: Mutex<Option<Arc<CompletionCoordinator>>>,
    model: Mutex<Option<SerializedNotebook>>,
    status: Mutex<KernelStatus>,
}

impl KernelSessionBinding {
    pub fn new(options: BindingOptions) -> Arc<Self> {
        let BindingOptions {
            model,
            kernel,
            editor_factory,
            settings,
        } = options;

        let commands = Arc::new(CommandRegistry::new());
        commands.set_key_bindings(&settings.key_bindings);

        let binding = Arc::new(KernelSessionBinding {
            document: Arc::new(Mutex::new(NotebookDocument::new(settings.read_only))),
            session: Arc::new(SessionContext::new(settings.kernel_info_timeout())),
            tracker: Arc::new(CellTracker::new()),
            commands,
            settings,
            editor_factory,
            editors: Mutex::new(HashMap::new()),
            generations: GenerationCounter::new(),
            kernel: Mutex::new(kernel),
            completion: Mutex::new(None),
            model: Mutex::new(model),
            status: Mutex::new(KernelStatus::Detached),
        });
        binding.install_document_commands();
        binding
    }

    pub fn document(&self) -> Arc<Mutex<NotebookDocument>> {
        Arc::clone(&self.document)
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn tracker(&self) -> &Arc<CellTracker> {
        &self.tracker
    }

    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    pub fn settings(&self) -> &NotebookSettings {
        &self.settings
    }

    pub fn status(&self) -> KernelStatus {
        lock(&self.status).clone()
    }

    pub fn generation(&self) -> Generation {
        self.generations.current()
    }

    /// The coordinator built for the current kernel, if any.
    pub fn completion(&self) -> Option<Arc<CompletionCoordinator>> {
        lock(&self.completion).clone()
    }

    fn set_status(&self, status: KernelStatus) {
        *lock(&self.status) = status;
    }

    /// Populate the document and adopt the configured kernel concurrently.
    ///
    /// A new notebook without a model gets a single empty cell of the default
    /// type. Kernel failures are absorbed and reported through [`status`].
    ///
    /// [`status`]: KernelSessionBinding::status
    pub async fn initialize(self: &Arc<Self>, is_new: bool) -> Result<()> {
        let kernel = lock(&self.kernel).clone();
        let adopt = async move {
            if let Some(kernel) = kernel {
                self.adopt_kernel(kernel).await;
            }
        };
        let populate = async { self.populate(is_new) };
        let ((), populated) = tokio::join!(adopt, populate);
        populated
    }

    /// Switch to another kernel. Resolves once this change has been adopted,
    /// has failed, or has been superseded by a later change.
    pub async fn change_kernel(self: &Arc<Self>, kernel: Arc<dyn KernelProvider>) {
        *lock(&self.kernel) = Some(Arc::clone(&kernel));
        self.adopt_kernel(kernel).await;
    }

    async fn adopt_kernel(self: &Arc<Self>, kernel: Arc<dyn KernelProvider>) {
        let generation = self.generations.advance();
        let name = kernel.name().to_string();
        info!("[binding] Changing kernel to {} ({:?})", name, generation);
        self.set_status(KernelStatus::Binding {
            kernel: name.clone(),
        });

        match self.connect(kernel.as_ref(), generation).await {
            Ok(true) => self.rebuild_wiring(generation),
            Ok(false) => debug!("[binding] Kernel change to {} was superseded", name),
            Err(e) if self.generations.is_current(generation) => {
                warn!("[binding] {}", e);
                self.session.detach();
                *lock(&self.completion) = None;
                self.set_status(KernelStatus::Failed {
                    reason: e.to_string(),
                });
            }
            Err(e) => debug!("[binding] Superseded kernel change failed: {}", e),
        }
    }

    async fn connect(&self, kernel: &dyn KernelProvider, generation: Generation) -> Result<bool> {
        let handle = kernel.get_connection().await.map_err(|e| {
            NotebookError::KernelBindingFailed(format!("{}: {}", kernel.name(), e))
        })?;
        if !self.generations.is_current(generation) {
            return Ok(false);
        }
        self.session
            .change_kernel(handle, generation, &self.generations)
            .await
    }

    fn rebuild_wiring(self: &Arc<Self>, generation: Generation) {
        if !self.generations.is_current(generation) {
            return;
        }
        let kernel_id = self
            .session
            .connection()
            .map(|h| h.kernel_id().to_string())
            .unwrap_or_default();

        let coordinator = CompletionCoordinator::new(
            Arc::clone(&self.session),
            self.tracker.current().map(|active| active.editor),
            generation,
            self.generations.clone(),
            self.settings.completer_timeout(),
        );
        let weak = Arc::downgrade(&coordinator);
        self.tracker.connect(move |active| match weak.upgrade() {
            Some(coordinator) => {
                coordinator.set_editor(active.map(|a| a.editor.clone()));
                true
            }
            None => false,
        });
        coordinator.start();
        *lock(&self.completion) = Some(Arc::clone(&coordinator));

        self.install_kernel_commands(&coordinator);
        self.set_status(KernelStatus::Ready { kernel_id });
    }

    fn populate(&self, is_new: bool) -> Result<()> {
        let model = lock(&self.model).clone();
        let mut document = lock(&self.document);
        match model {
            Some(model) => document.load(&model),
            None if is_new => {
                let kind = self.settings.default_cell_type.to_string();
                document.load(&SerializedNotebook::from_cells(vec![SerializedCell::new(
                    &kind, "",
                )]))
            }
            None => {
                debug!("[binding] No model to populate");
                Ok(())
            }
        }
    }

    /// Replace the notebook contents with `model`.
    pub fn set_model(&self, model: SerializedNotebook) -> Result<()> {
        *lock(&self.model) = Some(model);
        lock(&self.editors).clear();
        self.tracker.clear_current();
        self.tracker.clear_selection();
        self.populate(false)
    }

    /// Focus a cell, creating its editor through the factory when needed.
    ///
    /// Returns `Ok(false)` when no editor factory is configured.
    pub fn activate_cell(&self, cell_id: &str) -> Result<bool> {
        let editor = {
            let document = lock(&self.document);
            if document.is_disposed() {
                return Err(NotebookError::DocumentDisposed);
            }
            let cell = document
                .cell(cell_id)
                .ok_or_else(|| NotebookError::CellNotFound(cell_id.to_string()))?;
            let mut editors = lock(&self.editors);
            match editors.get(cell_id) {
                Some(editor) => Arc::clone(editor),
                None => {
                    let Some(factory) = &self.editor_factory else {
                        return Ok(false);
                    };
                    let editor = factory.new_inline_editor(cell);
                    editors.insert(cell_id.to_string(), Arc::clone(&editor));
                    editor
                }
            }
        };
        self.tracker.set_current(cell_id, &editor);
        Ok(true)
    }

    /// Focus a cell whose editor the host manages itself.
    pub fn set_active_editor(&self, cell_id: &str, editor: &Arc<dyn CellEditor>) {
        self.tracker.set_current(cell_id, editor);
    }

    /// Run one cell. Markdown cells render, raw cells are left alone and
    /// code cells execute on the attached kernel.
    pub async fn run_cell(&self, cell_id: &str) -> Result<()> {
        let kind = {
            let document = lock(&self.document);
            if document.is_disposed() {
                return Err(NotebookError::DocumentDisposed);
            }
            document
                .cell(cell_id)
                .map(|c| c.kind())
                .ok_or_else(|| NotebookError::CellNotFound(cell_id.to_string()))?
        };
        match kind {
            CellKind::Markdown => lock(&self.document).set_rendered(cell_id, true),
            CellKind::Raw => Ok(()),
            CellKind::Code => self.execute_code_cell(cell_id).await,
        }
    }

    async fn execute_code_cell(&self, cell_id: &str) -> Result<()> {
        let handle = self.session.connection().ok_or(NotebookError::NoKernel)?;
        let code = {
            let mut document = lock(&self.document);
            let code = document
                .cell(cell_id)
                .map(|c| c.source().to_string())
                .ok_or_else(|| NotebookError::CellNotFound(cell_id.to_string()))?;
            document.clear_cell_outputs(cell_id)?;
            code
        };

        info!(
            "[binding] Executing cell {} on kernel {}",
            cell_id,
            handle.kernel_id()
        );
        let contents = handle.execute(ExecuteRequest::new(code)).await?;

        let mut document = lock(&self.document);
        if document.cell(cell_id).is_none() {
            info!(
                "[binding] Cell {} went away during execution, dropping outputs",
                cell_id
            );
            return Ok(());
        }
        for event in contents.iter().flat_map(interpret) {
            match event {
                OutputEvent::Append(output) => document.append_output(cell_id, output)?,
                OutputEvent::Clear => {
                    // clear_output keeps the count already announced for this run.
                    let count = document.cell(cell_id).and_then(|c| c.execution_count());
                    document.clear_cell_outputs(cell_id)?;
                    if let Some(count) = count {
                        document.set_execution_count(cell_id, count)?;
                    }
                }
                OutputEvent::ExecutionCount(count) => {
                    document.set_execution_count(cell_id, count)?
                }
                OutputEvent::UpdateDisplay {
                    display_id,
                    data,
                    metadata,
                } => {
                    if document.update_display(&display_id, &data, &metadata)? == 0 {
                        warn!("[binding] No output found for display_id={}", display_id);
                    }
                }
            }
        }
        document.set_trusted(cell_id, true)
    }

    /// Run the selected cells and the current cell in document order.
    pub async fn run_selected(&self) -> Result<usize> {
        let targets = self.target_cells(None);
        for cell_id in &targets {
            self.run_cell(cell_id).await?;
        }
        Ok(targets.len())
    }

    /// Cells a command acts on, in document order: the explicit list, else
    /// every cell that is selected or current.
    fn target_cells(&self, explicit: Option<Vec<String>>) -> Vec<String> {
        let requested = match explicit {
            Some(ids) => ids,
            None => {
                let mut ids = self.tracker.selection();
                ids.extend(self.tracker.current_cell_id());
                ids
            }
        };
        let document = lock(&self.document);
        let mut indexed: Vec<(usize, String)> = requested
            .into_iter()
            .filter_map(|id| document.find_cell_index(&id).map(|i| (i, id)))
            .collect();
        indexed.sort_by_key(|(i, _)| *i);
        indexed.dedup_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, id)| id).collect()
    }

    /// Convert the targeted cells to `target`. Returns how many changed.
    pub fn convert_cells(&self, cells: Option<Vec<String>>, target: CellKind) -> Result<usize> {
        let targets = self.target_cells(cells);
        let mut selection: HashSet<String> = targets.iter().cloned().collect();
        let converted = lock(&self.document).convert_cell_type(&mut selection, target)?;
        self.tracker.clear_selection();
        if converted > 0 {
            // Replaced cells get fresh editors on next activation.
            let mut editors = lock(&self.editors);
            for id in &targets {
                editors.remove(id);
            }
        }
        Ok(converted)
    }

    pub async fn interrupt(&self) -> Result<()> {
        let handle = self.session.connection().ok_or(NotebookError::NoKernel)?;
        info!("[binding] Interrupting kernel {}", handle.kernel_id());
        handle.interrupt().await?;
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        let handle = self.session.connection().ok_or(NotebookError::NoKernel)?;
        info!("[binding] Restarting kernel {}", handle.kernel_id());
        handle.restart().await?;
        Ok(())
    }

    /// Tear everything down. In-flight kernel changes are superseded and
    /// later document operations fail with `DocumentDisposed`.
    pub fn dispose(&self) {
        self.generations.advance();
        self.session.detach();
        *lock(&self.completion) = None;
        lock(&self.editors).clear();
        self.tracker.clear_current();
        self.tracker.clear_selection();
        lock(&self.document).dispose();
        self.set_status(KernelStatus::Detached);
    }

    fn install_document_commands(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);

        self.commands.add_command(
            command_ids::RUN_SELECTED_CODECELL,
            Command::new(
                "Run Selected Cells",
                {
                    let weak = weak.clone();
                    move |_args| {
                        let weak = weak.clone();
                        async move {
                            let binding = upgrade(&weak)?;
                            let ran = binding.run_selected().await?;
                            Ok(Value::from(ran))
                        }
                    }
                },
                {
                    let weak = weak.clone();
                    move || {
                        weak.upgrade().is_some_and(|b| {
                            b.tracker.current_cell_id().is_some() && b.session.is_ready()
                        })
                    }
                },
            ),
        );

        for (name, label, target) in [
            (command_ids::CONVERT_TO_CODE, "Change to Code Cell Type", CellKind::Code),
            (
                command_ids::CONVERT_TO_MARKDOWN,
                "Change to Markdown Cell Type",
                CellKind::Markdown,
            ),
            (command_ids::CONVERT_TO_RAW, "Change to Raw Cell Type", CellKind::Raw),
        ] {
            self.commands.add_command(
                name,
                Command::new(
                    label,
                    {
                        let weak = weak.clone();
                        move |args: CommandArgs| {
                            let weak = weak.clone();
                            async move {
                                let binding = upgrade(&weak)?;
                                let converted = binding.convert_cells(cells_arg(&args), target)?;
                                Ok(Value::from(converted))
                            }
                        }
                    },
                    document_live(&weak),
                ),
            );
        }

        self.commands.add_command(
            command_ids::CHANGE_CELL_TYPE,
            Command::new(
                "Change Cell Type",
                {
                    let weak = weak.clone();
                    move |args: CommandArgs| {
                        let weak = weak.clone();
                        async move {
                            let binding = upgrade(&weak)?;
                            let target = args
                                .get("cell_type")
                                .and_then(Value::as_str)
                                .map(CellKind::parse_lossy)
                                .unwrap_or(CellKind::Raw);
                            let converted = binding.convert_cells(cells_arg(&args), target)?;
                            Ok(Value::from(converted))
                        }
                    }
                },
                document_live(&weak),
            ),
        );

        self.commands.add_command(
            command_ids::UNDO,
            Command::new(
                "Undo",
                {
                    let weak = weak.clone();
                    move |_args| {
                        let weak = weak.clone();
                        async move {
                            let binding = upgrade(&weak)?;
                            let undone = lock(&binding.document).undo()?;
                            Ok(Value::Bool(undone))
                        }
                    }
                },
                {
                    let weak = weak.clone();
                    move || weak.upgrade().is_some_and(|b| lock(&b.document).can_undo())
                },
            ),
        );

        self.commands.add_command(
            command_ids::REDO,
            Command::new(
                "Redo",
                {
                    let weak = weak.clone();
                    move |_args| {
                        let weak = weak.clone();
                        async move {
                            let binding = upgrade(&weak)?;
                            let redone = lock(&binding.document).redo()?;
                            Ok(Value::Bool(redone))
                        }
                    }
                },
                move || weak.upgrade().is_some_and(|b| lock(&b.document).can_redo()),
            ),
        );
    }

    /// Commands that act on the kernel. Re-registered after every adoption
    /// so they close over the new completion coordinator.
    fn install_kernel_commands(self: &Arc<Self>, coordinator: &Arc<CompletionCoordinator>) {
        let weak = Arc::downgrade(self);

        self.commands.add_command(
            command_ids::INTERRUPT_KERNEL,
            Command::new(
                "Interrupt Kernel",
                {
                    let weak = weak.clone();
                    move |_args| {
                        let weak = weak.clone();
                        async move {
                            upgrade(&weak)?.interrupt().await?;
                            Ok(Value::Null)
                        }
                    }
                },
                session_ready(&weak),
            ),
        );

        self.commands.add_command(
            command_ids::RESTART_KERNEL,
            Command::new(
                "Restart Kernel",
                {
                    let weak = weak.clone();
                    move |_args| {
                        let weak = weak.clone();
                        async move {
                            upgrade(&weak)?.restart().await?;
                            Ok(Value::Null)
                        }
                    }
                },
                session_ready(&weak),
            ),
        );

        let completer = Arc::downgrade(coordinator);
        self.commands.add_command(
            command_ids::INVOKE_COMPLETER,
            Command::new(
                "Display the completion helper",
                {
                    let completer = completer.clone();
                    move |_args| {
                        let completer = completer.clone();
                        async move {
                            let Some(coordinator) = completer.upgrade() else {
                                return Ok(Value::Null);
                            };
                            match coordinator.request_completion().await? {
                                Some(result) => Ok(serde_json::to_value(result)?),
                                None => Ok(Value::Null),
                            }
                        }
                    }
                },
                move || {
                    completer.upgrade().is_some_and(|c| {
                        c.phase() == crate::completion::CompletionPhase::Bound
                    })
                },
            ),
        );
    }
}

fn upgrade(weak: &Weak<KernelSessionBinding>) -> Result<Arc<KernelSessionBinding>> {
    weak.upgrade().ok_or(NotebookError::DocumentDisposed)
}

fn document_live(weak: &Weak<KernelSessionBinding>) -> impl Fn() -> bool + Send + Sync + 'static {
    let weak = weak.clone();
    move || weak.upgrade().is_some_and(|b| !lock(&b.document).is_disposed())
}

fn session_ready(weak: &Weak<KernelSessionBinding>) -> impl Fn() -> bool + Send + Sync + 'static {
    let weak = weak.clone();
    move || weak.upgrade().is_some_and(|b| b.session.is_ready())
}

fn cells_arg(args: &CommandArgs) -> Option<Vec<String>> {
    args.get("cells").and_then(Value::as_array).map(|cells| {
        cells
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}
