use stallwatch::classification::{classify, Category, CLASSIFICATION_DEPTH};
use stallwatch::domain::{StackFrame, ThreadState};
use stallwatch::stack_filter::{accounted_frames, collapse, view, FilteredFrame};
use stallwatch::{DiagnosticsConfig, DiagnosticsEngine};

fn app(method: &str) -> StackFrame {
    StackFrame::new("com.example.service.OrderService", method)
}

fn realistic_stack() -> Vec<StackFrame> {
    vec![
        StackFrame::new("java.net.SocketInputStream", "socketRead0").native(),
        StackFrame::new("java.net.SocketInputStream", "read"),
        app("fetch"),
        StackFrame::new("jdk.internal.reflect.GeneratedMethodAccessor12", "invoke"),
        StackFrame::new("java.lang.reflect.Method", "invoke"),
        StackFrame::new("org.springframework.aop.support.AopUtils", "invokeJoinpointUsingReflection"),
        app("handle"),
        StackFrame::new("org.apache.catalina.core.ApplicationFilterChain", "doFilter"),
        StackFrame::new("java.lang.Thread", "run"),
    ]
}

#[test]
fn test_lock_wait_on_top_beats_deep_network_frame() {
    let mut stack = vec![StackFrame::new("java.lang.Object", "wait0").native()];
    stack.extend((1..8).map(|i| app(&format!("step{i}"))));
    stack.push(StackFrame::new("java.net.SocketInputStream", "socketRead0").native());
    assert!(stack.len() > CLASSIFICATION_DEPTH);

    assert_eq!(classify(&stack, ThreadState::Waiting), Category::LockWait);
}

#[test]
fn test_network_frame_beyond_depth_is_ignored() {
    let mut stack: Vec<_> = (0..CLASSIFICATION_DEPTH).map(|i| app(&format!("step{i}"))).collect();
    stack.push(StackFrame::new("java.net.SocketInputStream", "socketRead0").native());

    assert_eq!(classify(&stack, ThreadState::Runnable), Category::Computation);
    assert_eq!(classify(&stack, ThreadState::Waiting), Category::Unknown);
}

#[test]
fn test_collapse_accounts_for_every_frame() {
    let stack = realistic_stack();
    for budget in 0..=stack.len() + 1 {
        let collapsed = collapse(&stack, budget);
        assert_eq!(accounted_frames(&collapsed), stack.len(), "budget {budget}");
        let truncated = view(&stack, false, budget);
        assert_eq!(accounted_frames(&truncated), stack.len(), "budget {budget}");
    }
}

#[test]
fn test_collapse_hides_framework_frames() {
    let stack = realistic_stack();
    let collapsed = collapse(&stack, 0);
    assert_eq!(
        collapsed,
        vec![
            FilteredFrame::Frame(&stack[0]),
            FilteredFrame::Frame(&stack[1]),
            FilteredFrame::Frame(&stack[2]),
            FilteredFrame::Collapsed(3),
            FilteredFrame::Frame(&stack[6]),
            FilteredFrame::Collapsed(2),
        ]
    );
}

#[test]
fn test_budget_on_application_frames() {
    let stack: Vec<_> = (0..5).map(|i| app(&format!("m{i}"))).collect();
    let collapsed = collapse(&stack, 3);

    assert_eq!(collapsed.len(), 4);
    assert_eq!(collapsed[3], FilteredFrame::More(2));
    assert!(!collapsed.iter().any(|f| matches!(f, FilteredFrame::Collapsed(_))));
}

#[test]
fn test_engine_view_follows_filter_setting() {
    let stack = realistic_stack();
    let intelligent = DiagnosticsEngine::new(DiagnosticsConfig {
        intelligent_filter: true,
        stack_budget: 0,
        ..Default::default()
    })
    .expect("valid config");
    assert_eq!(intelligent.stack_view(&stack), collapse(&stack, 0));

    let plain = DiagnosticsEngine::default();
    let shown = plain.stack_view(&stack);
    assert_eq!(shown.len(), stack.len());
    assert!(shown.iter().all(|f| matches!(f, FilteredFrame::Frame(_))));
}
