//! Small C programs used across the integration suites.

pub const RETURN_ZERO: &str = "int main(){return 0;}\n";

pub const HELLO: &str = r#"#include <stdio.h>
int main(void) {
    printf("hello, livecc\n");
    return 0;
}
"#;

pub const EXIT_THREE: &str = r#"#include <stdio.h>
int main(void) {
    fprintf(stderr, "bad thing\n");
    return 3;
}
"#;

/// Reads one integer and prints its double.
pub const DOUBLE_INPUT: &str = r#"#include <stdio.h>
int main(void) {
    int n = 0;
    if (scanf("%d", &n) != 1) {
        return 2;
    }
    printf("double=%d\n", n * 2);
    return 0;
}
"#;

pub const SILENT_LOOP: &str = r#"int main(void) {
    volatile unsigned long n = 0;
    for (;;) {
        n++;
    }
}
"#;

/// Waits for input forever; used to exercise interrupts.
pub const BLOCK_ON_STDIN: &str = r#"#include <stdio.h>
int main(void) {
    char buf[64];
    printf("waiting\n");
    fflush(stdout);
    while (fgets(buf, sizeof buf, stdin) != NULL) {
    }
    return 0;
}
"#;

pub const SYNTAX_ERROR: &str = "int main( { return 0 }\n";
