use std::io;
use std::io::Write;
use std::panic;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

/// Runs the command to completion, feeding it the given bytes on stdin and
/// redirecting its stdout and stderr to the given writers.
///
/// Both streams are copied unbuffered and in parallel so interleaved output
/// stays interleaved; the stdin writer runs concurrently as well so a child
/// that never reads its input cannot deadlock the copy loops. The function
/// does not return until the child has exited and both streams are closed.
pub(crate) fn run_with_streams(
    command: &mut Command,
    stdin: Option<&[u8]>,
    stdout_write: &mut (dyn Write + Send),
    stderr_write: &mut (dyn Write + Send),
) -> io::Result<ExitStatus> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let child_stdin = child.stdin.take();
    let child_stdout = child.stdout.take();
    let child_stderr = child.stderr.take();

    let copy_result = thread::scope(|scope| {
        let stdin_thread = match (child_stdin, stdin) {
            (Some(mut handle), Some(bytes)) => {
                Some(scope.spawn(move || ignore_broken_pipe(handle.write_all(bytes))))
            }
            _ => None,
        };

        let stdout_thread = child_stdout.map(|mut stdout| {
            scope.spawn(move || io::copy(&mut stdout, stdout_write).map(|_| ()))
        });

        let stderr_thread = child_stderr.map(|mut stderr| {
            scope.spawn(move || io::copy(&mut stderr, stderr_write).map(|_| ()))
        });

        let stdin_result = stdin_thread.map_or(Ok(()), join_and_unwind_panic);
        let stdout_result = stdout_thread.map_or(Ok(()), join_and_unwind_panic);
        let stderr_result = stderr_thread.map_or(Ok(()), join_and_unwind_panic);

        stdin_result.and(stdout_result).and(stderr_result)
    });

    let status = child.wait()?;
    copy_result?;

    Ok(status)
}

fn ignore_broken_pipe(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

fn join_and_unwind_panic<'scope, T>(handle: thread::ScopedJoinHandle<'scope, T>) -> T {
    match handle.join() {
        Ok(value) => value,
        Err(err) => panic::resume_unwind(err),
    }
}
