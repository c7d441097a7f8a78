mod common;

use common::{FakeEditorFactory, FakeKernel, FakeProvider};
use jupyter_protocol::JupyterMessageContent;
use notebook_core::{
    command_ids, BindingOptions, CellKind, CommandArgs, CommandOutcome, CompletionPhase,
    KernelSessionBinding, KernelStatus, KeyEvent, NotebookError, NotebookSettings, SerializedCell,
    SerializedNotebook,
};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn cell(cell_type: &str, id: &str, source: &str) -> SerializedCell {
    let mut cell = SerializedCell::new(cell_type, source);
    cell.id = Some(id.to_string());
    cell
}

fn notebook(cells: Vec<SerializedCell>) -> SerializedNotebook {
    SerializedNotebook::from_cells(cells)
}

fn binding_with(
    model: Option<SerializedNotebook>,
    kernel: Option<Arc<FakeProvider>>,
) -> Arc<KernelSessionBinding> {
    KernelSessionBinding::new(BindingOptions {
        model,
        kernel: kernel.map(|k| k as Arc<dyn notebook_core::KernelProvider>),
        editor_factory: Some(Arc::new(FakeEditorFactory::default())),
        settings: NotebookSettings::default(),
    })
}

async fn wait_for_status(binding: &KernelSessionBinding, expected: KernelStatus) {
    while binding.status() != expected {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_initialize_new_notebook_without_model() {
    let binding = binding_with(None, None);
    binding.initialize(true).await.unwrap();

    let document = binding.document();
    let document = document.lock().unwrap();
    assert_eq!(document.len(), 1);
    assert_eq!(document.cells()[0].kind(), CellKind::Code);
    assert_eq!(document.cells()[0].source(), "");
    assert!(document.cells()[0].is_editable());
    assert_eq!(binding.status(), KernelStatus::Detached);
    assert!(binding.completion().is_none());
}

#[tokio::test]
async fn test_initialize_existing_notebook_without_model_stays_empty() {
    let binding = binding_with(None, None);
    binding.initialize(false).await.unwrap();
    assert!(binding.document().lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_initialize_loads_model_and_adopts_kernel() {
    let kernel = FakeKernel::new("python3");
    let binding = binding_with(
        Some(notebook(vec![
            cell("code", "a", "x = 1"),
            cell("markdown", "b", "# Title"),
        ])),
        Some(FakeProvider::ready(&kernel)),
    );

    binding.initialize(false).await.unwrap();

    assert_eq!(binding.document().lock().unwrap().len(), 2);
    assert_eq!(
        binding.status(),
        KernelStatus::Ready {
            kernel_id: "python3".into()
        }
    );
    let completion = binding.completion().unwrap();
    completion.wait_until_bound().await;
    assert_eq!(completion.phase(), CompletionPhase::Bound);
    assert_eq!(completion.bound_kernel_id().as_deref(), Some("python3"));
}

#[tokio::test]
async fn test_stale_kernel_change_is_ignored() {
    let slow = FakeKernel::new("slow");
    let fast = FakeKernel::new("fast");
    let slow_provider = FakeProvider::gated(&slow);
    let binding = binding_with(Some(notebook(vec![cell("code", "a", "1")])), None);
    binding.initialize(false).await.unwrap();

    let pending = {
        let binding = Arc::clone(&binding);
        let provider = Arc::clone(&slow_provider);
        tokio::spawn(async move { binding.change_kernel(provider).await })
    };
    wait_for_status(
        &binding,
        KernelStatus::Binding {
            kernel: "slow".into(),
        },
    )
    .await;

    binding.change_kernel(FakeProvider::ready(&fast)).await;
    slow_provider.release();
    pending.await.unwrap();

    assert_eq!(binding.session().connection().unwrap().kernel_id(), "fast");
    assert_eq!(
        binding.status(),
        KernelStatus::Ready {
            kernel_id: "fast".into()
        }
    );
    let completion = binding.completion().unwrap();
    completion.wait_until_bound().await;
    assert_eq!(completion.bound_kernel_id().as_deref(), Some("fast"));
    assert_eq!(completion.generation(), binding.generation());
}

#[tokio::test]
async fn test_run_command_requires_active_cell_and_ready_session() {
    let kernel = FakeKernel::new("k");
    let provider = FakeProvider::gated(&kernel);
    let binding = binding_with(Some(notebook(vec![cell("code", "a", "1 + 1")])), None);
    binding.initialize(false).await.unwrap();
    let commands = binding.commands();

    assert!(!commands.is_enabled(command_ids::RUN_SELECTED_CODECELL).unwrap());

    assert!(binding.activate_cell("a").unwrap());
    assert!(!commands.is_enabled(command_ids::RUN_SELECTED_CODECELL).unwrap());

    let pending = {
        let binding = Arc::clone(&binding);
        let provider = Arc::clone(&provider);
        tokio::spawn(async move { binding.change_kernel(provider).await })
    };
    wait_for_status(&binding, KernelStatus::Binding { kernel: "k".into() }).await;
    assert!(!commands.is_enabled(command_ids::RUN_SELECTED_CODECELL).unwrap());
    let outcome = commands
        .invoke(command_ids::RUN_SELECTED_CODECELL, CommandArgs::new())
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Disabled);
    assert!(kernel.executed().is_empty());

    provider.release();
    pending.await.unwrap();
    assert!(commands.is_enabled(command_ids::RUN_SELECTED_CODECELL).unwrap());
}

#[tokio::test]
async fn test_failed_binding_leaves_kernel_commands_disabled() {
    let binding = binding_with(
        Some(notebook(vec![cell("code", "a", "1")])),
        Some(FakeProvider::failing("broken")),
    );
    binding.initialize(false).await.unwrap();
    binding.activate_cell("a").unwrap();

    assert!(matches!(binding.status(), KernelStatus::Failed { .. }));
    assert!(binding.completion().is_none());
    assert!(!binding
        .commands()
        .is_enabled(command_ids::RUN_SELECTED_CODECELL)
        .unwrap());

    // The document stays usable without a kernel.
    let outcome = binding
        .commands()
        .invoke(command_ids::CONVERT_TO_MARKDOWN, CommandArgs::new())
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Executed(Value::from(1)));
}

#[tokio::test]
async fn test_dead_kernel_fails_handshake() {
    let binding = binding_with(
        Some(notebook(vec![cell("code", "a", "1")])),
        Some(FakeProvider::ready(&FakeKernel::dead("zombie"))),
    );
    binding.initialize(false).await.unwrap();

    match binding.status() {
        KernelStatus::Failed { reason } => assert!(reason.contains("zombie")),
        other => panic!("unexpected status {:?}", other),
    }
    assert!(!binding.session().is_ready());
}

#[tokio::test]
async fn test_run_selected_writes_outputs() {
    let kernel = FakeKernel::new("k");
    let binding = binding_with(
        Some(notebook(vec![
            cell("code", "a", "print('a')"),
            cell("code", "b", "print('b')"),
            cell("raw", "c", "raw text"),
        ])),
        Some(FakeProvider::ready(&kernel)),
    );
    binding.initialize(false).await.unwrap();
    binding.activate_cell("a").unwrap();
    binding.tracker().select("c");
    binding.tracker().select("b");

    let outcome = binding
        .commands()
        .invoke(command_ids::RUN_SELECTED_CODECELL, CommandArgs::new())
        .await
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Executed(Value::from(3)));
    assert_eq!(kernel.executed(), vec!["print('a')", "print('b')"]);

    let document = binding.document();
    let document = document.lock().unwrap();
    assert_eq!(document.cell("a").unwrap().execution_count(), Some(1));
    let b = document.cell("b").unwrap();
    assert_eq!(b.execution_count(), Some(2));
    assert_eq!(b.outputs().len(), 1);
    assert_eq!(b.outputs()[0]["text"], "ran print('b')\n");
    assert!(b.trusted());
    assert!(document.cell("c").unwrap().outputs().is_empty());
}

#[tokio::test]
async fn test_rerun_replaces_outputs() {
    let kernel = FakeKernel::new("k");
    let binding = binding_with(
        Some(notebook(vec![cell("code", "a", "x")])),
        Some(FakeProvider::ready(&kernel)),
    );
    binding.initialize(false).await.unwrap();

    binding.run_cell("a").await.unwrap();
    binding.run_cell("a").await.unwrap();

    let document = binding.document();
    let document = document.lock().unwrap();
    let a = document.cell("a").unwrap();
    assert_eq!(a.outputs().len(), 1);
    assert_eq!(a.execution_count(), Some(2));
}

#[tokio::test]
async fn test_update_display_data_rewrites_earlier_output() {
    let kernel = FakeKernel::new("k");
    kernel.also_publish(
        JupyterMessageContent::from_type_and_content(
            "display_data",
            json!({
                "data": {"text/plain": "0%"},
                "metadata": {},
                "transient": {"display_id": "progress"}
            }),
        )
        .unwrap(),
    );
    kernel.also_publish(
        JupyterMessageContent::from_type_and_content(
            "update_display_data",
            json!({
                "data": {"text/plain": "100%"},
                "metadata": {},
                "transient": {"display_id": "progress"}
            }),
        )
        .unwrap(),
    );
    let binding = binding_with(
        Some(notebook(vec![cell("code", "a", "bar()")])),
        Some(FakeProvider::ready(&kernel)),
    );
    binding.initialize(false).await.unwrap();

    binding.run_cell("a").await.unwrap();

    let document = binding.document();
    let document = document.lock().unwrap();
    let outputs = document.cell("a").unwrap().outputs().to_vec();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[1]["output_type"], "display_data");
    assert_eq!(outputs[1]["data"]["text/plain"], "100%");

    let saved = document.to_serialized().unwrap();
    assert!(saved.cells[0].outputs[1].get("transient").is_none());
}

#[tokio::test]
async fn test_run_markdown_cell_renders_without_kernel() {
    let binding = binding_with(Some(notebook(vec![cell("markdown", "m", "# Hi")])), None);
    binding.initialize(false).await.unwrap();
    binding
        .document()
        .lock()
        .unwrap()
        .set_rendered("m", false)
        .unwrap();

    binding.run_cell("m").await.unwrap();

    assert!(binding.document().lock().unwrap().is_rendered("m"));
}

#[tokio::test]
async fn test_run_code_cell_without_kernel() {
    let binding = binding_with(Some(notebook(vec![cell("code", "a", "1")])), None);
    binding.initialize(false).await.unwrap();

    assert!(matches!(
        binding.run_cell("a").await,
        Err(NotebookError::NoKernel)
    ));
    assert!(matches!(
        binding.run_cell("missing").await,
        Err(NotebookError::CellNotFound(_))
    ));
}

#[tokio::test]
async fn test_completion_follows_active_editor() {
    let kernel = FakeKernel::new("k");
    let binding = binding_with(
        Some(notebook(vec![cell("code", "a", "imp"), cell("code", "b", "pri")])),
        Some(FakeProvider::ready(&kernel)),
    );
    let commands = binding.commands();

    let before = commands
        .invoke(command_ids::INVOKE_COMPLETER, CommandArgs::new())
        .await;
    assert!(matches!(before, Err(NotebookError::UnknownCommand(_))));

    binding.initialize(false).await.unwrap();
    binding.activate_cell("a").unwrap();
    let completion = binding.completion().unwrap();
    completion.wait_until_bound().await;

    let outcome = commands
        .invoke(command_ids::INVOKE_COMPLETER, CommandArgs::new())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::Executed(json!({
            "matches": ["imp_from_k"],
            "cursor_start": 0,
            "cursor_end": 3
        }))
    );

    binding.activate_cell("b").unwrap();
    let result = completion.request_completion().await.unwrap().unwrap();
    assert_eq!(result.matches, vec!["pri_from_k"]);
    assert_eq!(completion.editor().unwrap().cell_id(), "b");
}

#[tokio::test]
async fn test_kernel_commands_interrupt_and_restart() {
    let kernel = FakeKernel::new("k");
    let binding = binding_with(
        Some(notebook(vec![cell("code", "a", "1")])),
        Some(FakeProvider::ready(&kernel)),
    );
    binding.initialize(false).await.unwrap();

    for name in [command_ids::INTERRUPT_KERNEL, command_ids::RESTART_KERNEL] {
        let outcome = binding
            .commands()
            .invoke(name, CommandArgs::new())
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Executed(Value::Null));
    }
    assert_eq!(kernel.interrupts.load(Ordering::SeqCst), 1);
    assert_eq!(kernel.restarts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_key_bindings_convert_and_undo() {
    let binding = binding_with(
        Some(notebook(vec![cell("code", "a", "x = 1"), cell("code", "b", "y")])),
        None,
    );
    binding.initialize(false).await.unwrap();
    binding.activate_cell("a").unwrap();
    let commands = binding.commands();

    let outcome = commands.process_key_event(&KeyEvent::new("m")).await;
    assert!(matches!(outcome, Some(Ok(CommandOutcome::Executed(_)))));
    {
        let document = binding.document();
        let document = document.lock().unwrap();
        assert_eq!(document.cell("a").unwrap().kind(), CellKind::Markdown);
        assert_eq!(document.cell("a").unwrap().source(), "x = 1");
        assert!(!document.is_rendered("a"));
        assert_eq!(document.cell("b").unwrap().kind(), CellKind::Code);
    }

    commands.process_key_event(&KeyEvent::new("z")).await;
    assert_eq!(
        binding.document().lock().unwrap().cell("a").unwrap().kind(),
        CellKind::Code
    );

    commands
        .process_key_event(&KeyEvent::new("Z").with_shift())
        .await;
    assert_eq!(
        binding.document().lock().unwrap().cell("a").unwrap().kind(),
        CellKind::Markdown
    );
}

#[tokio::test]
async fn test_convert_includes_current_cell_and_selection() {
    let binding = binding_with(
        Some(notebook(vec![
            cell("code", "a", "1"),
            cell("code", "b", "2"),
            cell("code", "c", "3"),
        ])),
        None,
    );
    binding.initialize(false).await.unwrap();
    binding.activate_cell("a").unwrap();
    binding.tracker().select("b");

    let outcome = binding
        .commands()
        .invoke(command_ids::CONVERT_TO_RAW, CommandArgs::new())
        .await
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Executed(Value::from(2)));
    let document = binding.document();
    let document = document.lock().unwrap();
    assert_eq!(document.cell("a").unwrap().kind(), CellKind::Raw);
    assert_eq!(document.cell("b").unwrap().kind(), CellKind::Raw);
    assert_eq!(document.cell("c").unwrap().kind(), CellKind::Code);
    assert!(binding.tracker().selection().is_empty());
}

#[tokio::test]
async fn test_change_cell_type_with_explicit_cells() {
    let binding = binding_with(
        Some(notebook(vec![
            cell("code", "a", "1"),
            cell("code", "b", "2"),
            cell("markdown", "c", "3"),
        ])),
        None,
    );
    binding.initialize(false).await.unwrap();

    let mut args = CommandArgs::new();
    args.insert("cell_type".into(), json!("bogus"));
    args.insert("cells".into(), json!(["b", "c"]));
    let outcome = binding
        .commands()
        .invoke(command_ids::CHANGE_CELL_TYPE, args)
        .await
        .unwrap();

    assert_eq!(outcome, CommandOutcome::Executed(Value::from(2)));
    let document = binding.document();
    let document = document.lock().unwrap();
    assert_eq!(document.cell("a").unwrap().kind(), CellKind::Code);
    assert_eq!(document.cell("b").unwrap().kind(), CellKind::Raw);
    assert_eq!(document.cell("c").unwrap().kind(), CellKind::Raw);
}

#[tokio::test]
async fn test_unknown_command_is_an_error() {
    let binding = binding_with(None, None);
    let result = binding
        .commands()
        .invoke("no-such-command", CommandArgs::new())
        .await;
    assert!(matches!(result, Err(NotebookError::UnknownCommand(name)) if name == "no-such-command"));
}

#[tokio::test]
async fn test_set_model_replaces_contents() {
    let binding = binding_with(Some(notebook(vec![cell("code", "a", "1")])), None);
    binding.initialize(false).await.unwrap();
    binding.activate_cell("a").unwrap();

    binding
        .set_model(notebook(vec![cell("raw", "r1", ""), cell("raw", "r2", "")]))
        .unwrap();

    let document = binding.document();
    assert_eq!(document.lock().unwrap().len(), 2);
    assert!(binding.tracker().current().is_none());
}

#[tokio::test]
async fn test_dispose_disables_everything() {
    let kernel = FakeKernel::new("k");
    let binding = binding_with(
        Some(notebook(vec![cell("code", "a", "1")])),
        Some(FakeProvider::ready(&kernel)),
    );
    binding.initialize(false).await.unwrap();
    binding.activate_cell("a").unwrap();

    binding.dispose();

    assert_eq!(binding.status(), KernelStatus::Detached);
    assert!(!binding.session().is_ready());
    assert!(binding.completion().is_none());
    let outcome = binding
        .commands()
        .invoke(command_ids::CONVERT_TO_RAW, CommandArgs::new())
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Disabled);
    assert!(matches!(
        binding.run_cell("a").await,
        Err(NotebookError::DocumentDisposed)
    ));
    assert!(matches!(
        binding.activate_cell("a"),
        Err(NotebookError::DocumentDisposed)
    ));
}
